use std::{fmt, io};

#[derive(Debug)]
pub enum CplyError {
    ParsePly(String),
    MissingElement(String),
    MissingProperty {
        element: String,
        property: String,
    },
    PropertyType {
        element: String,
        property: String,
        expected: &'static str,
        found: &'static str,
    },
    ColumnLength {
        element: String,
        property: String,
        expected: usize,
        found: usize,
    },
    ChunkCount {
        chunks: usize,
        needed: usize,
    },
    ShLayout(String),
    EmptySplats,
    ThreadPool(String),
    IoError(io::Error),
}

impl fmt::Display for CplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CplyError::ParsePly(e) => {
                write!(f, "Failed to parse PLY data from the buffer: {}", e)
            }
            CplyError::MissingElement(name) => {
                write!(f, "Missing required element: {}", name)
            }
            CplyError::MissingProperty { element, property } => {
                write!(f, "Missing required property '{}' on element '{}'", property, element)
            }
            CplyError::PropertyType {
                element,
                property,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Property '{}' on element '{}' has type {}, expected {}",
                    property, element, found, expected
                )
            }
            CplyError::ColumnLength {
                element,
                property,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Property '{}' on element '{}' has {} values, element count is {}",
                    property, element, found, expected
                )
            }
            CplyError::ChunkCount { chunks, needed } => {
                write!(
                    f,
                    "Not enough chunk records: have {}, need at least {}",
                    chunks, needed
                )
            }
            CplyError::ShLayout(e) => {
                write!(f, "Unsupported spherical harmonics layout: {}", e)
            }
            CplyError::EmptySplats => {
                write!(f, "There are no splats to decode.")
            }
            CplyError::ThreadPool(e) => {
                write!(f, "Failed to build the worker pool: {}", e)
            }
            CplyError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for CplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CplyError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CplyError {
    fn from(e: io::Error) -> Self {
        CplyError::IoError(e)
    }
}
