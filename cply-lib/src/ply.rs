use crate::error::CplyError;
use crate::structures::{Element, ElementList, PropertyData, PropertyType};
use std::io::Write;
use zerocopy::byteorder::little_endian::{F32, F64, I16, I32, U16, U32};
use zerocopy::FromBytes;

struct ElementLayout {
    name: String,
    count: usize,
    properties: Vec<(String, PropertyType)>,
}

impl ElementLayout {
    fn record_size(&self) -> usize {
        self.properties.iter().map(|(_, ty)| ty.size()).sum()
    }
}

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    let line = match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            &buffer[start..start + pos]
        }
        None => {
            *offset = buffer.len();
            &buffer[start..]
        }
    };
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

#[inline(always)]
fn read<T: FromBytes>(bytes: &[u8]) -> Result<T, CplyError> {
    T::read_from_prefix(bytes)
        .map(|(value, _)| value)
        .map_err(|_| CplyError::ParsePly("Unexpected end of binary data".to_string()))
}

#[inline]
fn push_value(column: &mut PropertyData, bytes: &[u8]) -> Result<(), CplyError> {
    match column {
        PropertyData::Char(v) => v.push(read::<u8>(bytes)? as i8),
        PropertyData::Uchar(v) => v.push(read::<u8>(bytes)?),
        PropertyData::Short(v) => v.push(read::<I16>(bytes)?.get()),
        PropertyData::Ushort(v) => v.push(read::<U16>(bytes)?.get()),
        PropertyData::Int(v) => v.push(read::<I32>(bytes)?.get()),
        PropertyData::Uint(v) => v.push(read::<U32>(bytes)?.get()),
        PropertyData::Float(v) => v.push(read::<F32>(bytes)?.get()),
        PropertyData::Double(v) => v.push(read::<F64>(bytes)?.get()),
    }
    Ok(())
}

fn parse_header(
    raw_data: &[u8],
    offset: &mut usize,
) -> Result<Vec<ElementLayout>, CplyError> {
    let line1 = next_line(raw_data, offset)
        .ok_or_else(|| CplyError::ParsePly("No 'ply' line".to_string()))?;
    if line1 != b"ply" {
        return Err(CplyError::ParsePly(
            "Not a .ply file (missing 'ply' header)".to_string(),
        ));
    }

    let mut layouts: Vec<ElementLayout> = Vec::new();
    let mut format_seen = false;
    loop {
        let raw_line = next_line(raw_data, offset).ok_or_else(|| {
            CplyError::ParsePly("No 'end_header' found before EOF".to_string())
        })?;
        let line = std::str::from_utf8(raw_line)
            .map_err(|e| CplyError::ParsePly(format!("UTF-8 error: {}", e)))?
            .trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields[0] {
            "format" => {
                if fields.len() != 3 || fields[1] != "binary_little_endian" || fields[2] != "1.0" {
                    return Err(CplyError::ParsePly(
                        "Unsupported .ply format (only binary_little_endian 1.0 is supported)"
                            .to_string(),
                    ));
                }
                format_seen = true;
            }
            "comment" | "obj_info" => {}
            "element" => {
                if fields.len() != 3 {
                    return Err(CplyError::ParsePly(format!("Invalid element line: {}", line)));
                }
                let count = fields[2].parse().map_err(|e| {
                    CplyError::ParsePly(format!("Invalid count for element '{}': {}", fields[1], e))
                })?;
                layouts.push(ElementLayout {
                    name: fields[1].to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            "property" => {
                if fields.get(1) == Some(&"list") {
                    return Err(CplyError::ParsePly(
                        "PLY list properties are not supported".to_string(),
                    ));
                }
                if fields.len() != 3 {
                    return Err(CplyError::ParsePly(format!("Invalid property line: {}", line)));
                }
                let layout = layouts.last_mut().ok_or_else(|| {
                    CplyError::ParsePly("Property outside of element".to_string())
                })?;
                let ty = PropertyType::parse(fields[1]).ok_or_else(|| {
                    CplyError::ParsePly(format!("Unsupported property type: {}", fields[1]))
                })?;
                if layout.properties.iter().any(|(name, _)| name == fields[2]) {
                    return Err(CplyError::ParsePly(format!(
                        "Duplicate property '{}' in element '{}'",
                        fields[2], layout.name
                    )));
                }
                layout.properties.push((fields[2].to_string(), ty));
            }
            "end_header" => break,
            _ => {
                return Err(CplyError::ParsePly(format!(
                    "Unsupported header line: {}",
                    line
                )))
            }
        }
    }

    if !format_seen {
        return Err(CplyError::ParsePly("Missing format line".to_string()));
    }
    Ok(layouts)
}

/// Parses a binary little-endian PLY buffer into columnar elements.
#[inline(never)]
pub fn parse_ply(raw_data: &[u8]) -> Result<ElementList, CplyError> {
    let _span = tracing::trace_span!("parse_ply").entered();

    let mut offset = 0;
    let layouts = parse_header(raw_data, &mut offset)?;
    let data = &raw_data[offset..];
    let mut cursor = 0;

    let mut elements = Vec::with_capacity(layouts.len());
    for layout in layouts {
        let record_size = layout.record_size();
        let expected_bytes = layout.count.checked_mul(record_size).ok_or_else(|| {
            CplyError::ParsePly("Overflow in byte calculation".to_string())
        })?;
        let available = data.len() - cursor;
        if available < expected_bytes {
            return Err(CplyError::ParsePly(format!(
                "Binary data is too short for element '{}', need {} bytes, have {}",
                layout.name, expected_bytes, available
            )));
        }

        let mut columns: Vec<PropertyData> = layout
            .properties
            .iter()
            .map(|(_, ty)| PropertyData::with_capacity(*ty, layout.count))
            .collect();

        if record_size > 0 {
            let block = &data[cursor..cursor + expected_bytes];
            for record in block.chunks_exact(record_size) {
                let mut field = 0;
                for column in columns.iter_mut() {
                    push_value(column, &record[field..])?;
                    field += column.property_type().size();
                }
            }
        }
        cursor += expected_bytes;

        let mut element = Element::new(layout.name, layout.count);
        for ((name, _), column) in layout.properties.into_iter().zip(columns) {
            element.add_property(name, column)?;
        }
        tracing::trace!(
            element = element.name(),
            count = element.count(),
            properties = element.properties().len(),
            "parsed element"
        );
        elements.push(element);
    }

    if cursor != data.len() {
        tracing::debug!(trailing = data.len() - cursor, "ignoring trailing bytes after PLY data");
    }

    Ok(ElementList::new(elements))
}

/// Writes `elements` as a binary little-endian PLY file, replacing the
/// contents of `output`.
pub fn write_ply(output: &mut Vec<u8>, elements: &ElementList) -> Result<(), CplyError> {
    let _span = tracing::trace_span!("write_ply").entered();

    output.clear();
    output.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
    for element in &elements.elements {
        writeln!(output, "element {} {}", element.name(), element.count())?;
        for property in element.properties() {
            writeln!(
                output,
                "property {} {}",
                property.data.property_type().name(),
                property.name
            )?;
        }
    }
    output.extend_from_slice(b"end_header\n");

    let body: usize = elements
        .elements
        .iter()
        .map(|e| e.count() * e.record_size())
        .sum();
    output.reserve(body);

    for element in &elements.elements {
        let properties = element.properties();
        for i in 0..element.count() {
            for property in properties {
                match &property.data {
                    PropertyData::Char(v) => output.extend_from_slice(&v[i].to_le_bytes()),
                    PropertyData::Uchar(v) => output.push(v[i]),
                    PropertyData::Short(v) => output.extend_from_slice(&v[i].to_le_bytes()),
                    PropertyData::Ushort(v) => output.extend_from_slice(&v[i].to_le_bytes()),
                    PropertyData::Int(v) => output.extend_from_slice(&v[i].to_le_bytes()),
                    PropertyData::Uint(v) => output.extend_from_slice(&v[i].to_le_bytes()),
                    PropertyData::Float(v) => output.extend_from_slice(&v[i].to_le_bytes()),
                    PropertyData::Double(v) => output.extend_from_slice(&v[i].to_le_bytes()),
                }
            }
        }
    }
    Ok(())
}
