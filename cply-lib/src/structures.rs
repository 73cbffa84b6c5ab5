use crate::error::CplyError;
use foldhash::HashMap;
use foldhash::HashMapExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Float,
    Double,
}

impl PropertyType {
    pub fn parse(s: &str) -> Option<Self> {
        let ty = match s {
            "char" | "int8" => PropertyType::Char,
            "uchar" | "uint8" => PropertyType::Uchar,
            "short" | "int16" => PropertyType::Short,
            "ushort" | "uint16" => PropertyType::Ushort,
            "int" | "int32" => PropertyType::Int,
            "uint" | "uint32" => PropertyType::Uint,
            "float" | "float32" => PropertyType::Float,
            "double" | "float64" => PropertyType::Double,
            _ => return None,
        };
        Some(ty)
    }

    pub const fn size(self) -> usize {
        match self {
            PropertyType::Char | PropertyType::Uchar => 1,
            PropertyType::Short | PropertyType::Ushort => 2,
            PropertyType::Int | PropertyType::Uint | PropertyType::Float => 4,
            PropertyType::Double => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PropertyType::Char => "char",
            PropertyType::Uchar => "uchar",
            PropertyType::Short => "short",
            PropertyType::Ushort => "ushort",
            PropertyType::Int => "int",
            PropertyType::Uint => "uint",
            PropertyType::Float => "float",
            PropertyType::Double => "double",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyData {
    Char(Vec<i8>),
    Uchar(Vec<u8>),
    Short(Vec<i16>),
    Ushort(Vec<u16>),
    Int(Vec<i32>),
    Uint(Vec<u32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl PropertyData {
    pub fn with_capacity(ty: PropertyType, capacity: usize) -> Self {
        match ty {
            PropertyType::Char => PropertyData::Char(Vec::with_capacity(capacity)),
            PropertyType::Uchar => PropertyData::Uchar(Vec::with_capacity(capacity)),
            PropertyType::Short => PropertyData::Short(Vec::with_capacity(capacity)),
            PropertyType::Ushort => PropertyData::Ushort(Vec::with_capacity(capacity)),
            PropertyType::Int => PropertyData::Int(Vec::with_capacity(capacity)),
            PropertyType::Uint => PropertyData::Uint(Vec::with_capacity(capacity)),
            PropertyType::Float => PropertyData::Float(Vec::with_capacity(capacity)),
            PropertyType::Double => PropertyData::Double(Vec::with_capacity(capacity)),
        }
    }

    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyData::Char(_) => PropertyType::Char,
            PropertyData::Uchar(_) => PropertyType::Uchar,
            PropertyData::Short(_) => PropertyType::Short,
            PropertyData::Ushort(_) => PropertyType::Ushort,
            PropertyData::Int(_) => PropertyType::Int,
            PropertyData::Uint(_) => PropertyType::Uint,
            PropertyData::Float(_) => PropertyType::Float,
            PropertyData::Double(_) => PropertyType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PropertyData::Char(v) => v.len(),
            PropertyData::Uchar(v) => v.len(),
            PropertyData::Short(v) => v.len(),
            PropertyData::Ushort(v) => v.len(),
            PropertyData::Int(v) => v.len(),
            PropertyData::Uint(v) => v.len(),
            PropertyData::Float(v) => v.len(),
            PropertyData::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub data: PropertyData,
}

/// A named group of equally sized columns, e.g. the `vertex` or `chunk`
/// element of a PLY file.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
    index: HashMap<String, usize>,
}

impl Element {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Element {
            name: name.into(),
            count,
            properties: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn add_property(
        &mut self,
        name: impl Into<String>,
        data: PropertyData,
    ) -> Result<(), CplyError> {
        let name = name.into();
        if data.len() != self.count {
            return Err(CplyError::ColumnLength {
                element: self.name.clone(),
                property: name,
                expected: self.count,
                found: data.len(),
            });
        }
        match self.index.get(&name) {
            Some(&i) => self.properties[i].data = data,
            None => {
                self.index.insert(name.clone(), self.properties.len());
                self.properties.push(Property { name, data });
            }
        }
        Ok(())
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        data: PropertyData,
    ) -> Result<Self, CplyError> {
        self.add_property(name, data)?;
        Ok(self)
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn required(&self, name: &str) -> Result<&PropertyData, CplyError> {
        self.property(name)
            .map(|p| &p.data)
            .ok_or_else(|| CplyError::MissingProperty {
                element: self.name.clone(),
                property: name.to_string(),
            })
    }

    fn type_error(&self, name: &str, expected: PropertyType, found: &PropertyData) -> CplyError {
        CplyError::PropertyType {
            element: self.name.clone(),
            property: name.to_string(),
            expected: expected.name(),
            found: found.property_type().name(),
        }
    }

    pub fn u32_column(&self, name: &str) -> Result<&[u32], CplyError> {
        match self.required(name)? {
            PropertyData::Uint(v) => Ok(v),
            other => Err(self.type_error(name, PropertyType::Uint, other)),
        }
    }

    pub fn f32_column(&self, name: &str) -> Result<&[f32], CplyError> {
        match self.required(name)? {
            PropertyData::Float(v) => Ok(v),
            other => Err(self.type_error(name, PropertyType::Float, other)),
        }
    }

    pub fn u8_column(&self, name: &str) -> Result<&[u8], CplyError> {
        match self.required(name)? {
            PropertyData::Uchar(v) => Ok(v),
            other => Err(self.type_error(name, PropertyType::Uchar, other)),
        }
    }

    /// Bytes per record when the element is stored row-major.
    pub fn record_size(&self) -> usize {
        self.properties
            .iter()
            .map(|p| p.data.property_type().size())
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElementList {
    pub elements: Vec<Element>,
}

impl ElementList {
    pub fn new(elements: Vec<Element>) -> Self {
        ElementList { elements }
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn required(&self, name: &str) -> Result<&Element, CplyError> {
        self.element(name)
            .ok_or_else(|| CplyError::MissingElement(name.to_string()))
    }
}

/// Quantization bounds shared by one group of `CHUNK_SIZE` splats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub min_scale: [f32; 3],
    pub max_scale: [f32; 3],
    pub min_color: [f32; 3],
    pub max_color: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedSplat {
    pub position: u32,
    pub rotation: u32,
    pub scale: u32,
    pub color: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecodedSplat {
    pub position: [f32; 3],
    /// `rot_0..rot_3`
    pub rotation: [f32; 4],
    /// Log-space.
    pub scale: [f32; 3],
    pub f_dc: [f32; 3],
    /// Logit-space.
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedSplats {
    pub num_splats: usize,
    pub sh_bands: usize,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub f_dc_0: Vec<f32>,
    pub f_dc_1: Vec<f32>,
    pub f_dc_2: Vec<f32>,
    pub opacity: Vec<f32>,
    pub rot_0: Vec<f32>,
    pub rot_1: Vec<f32>,
    pub rot_2: Vec<f32>,
    pub rot_3: Vec<f32>,
    pub scale_0: Vec<f32>,
    pub scale_1: Vec<f32>,
    pub scale_2: Vec<f32>,
    /// One column per `f_rest_*` coefficient, empty when `sh_bands == 0`.
    pub f_rest: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn half_extents(&self) -> [f32; 3] {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }
}
