use crate::common::{
    chunks_for_splats, color_to_sh_dc, inv_sigmoid, lerp, sh_bands_for_coeffs, unpack_111011,
    unpack_8888, unpack_rot, unquantize_sh, CHUNK_SIZE,
};
use crate::error::CplyError;
use crate::structures::{
    Aabb, Chunk, DecodedSplat, DecodedSplats, Element, ElementList, PackedSplat, PropertyData,
};
use glam::{Mat3, Quat, Vec3};
use rayon::prelude::*;

pub const VERTEX_ELEMENT: &str = "vertex";
pub const CHUNK_ELEMENT: &str = "chunk";
pub const SH_ELEMENT: &str = "sh";

/// Float columns written per splat, excluding `f_rest_*`.
const OUTPUT_COLUMNS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Worker threads for the decode pass; `0` uses the global rayon pool.
    pub workers: u32,
    /// Decode the optional `sh` element into `f_rest_*` columns.
    pub include_sh: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            workers: 0,
            include_sh: true,
        }
    }
}

/// Decodes one packed splat against the bounds of its chunk.
#[inline]
pub fn decode_splat(packed: &PackedSplat, chunk: &Chunk) -> DecodedSplat {
    let p = unpack_111011(packed.position);
    let s = unpack_111011(packed.scale);
    let c = unpack_8888(packed.color);

    let position = [
        lerp(chunk.min[0], chunk.max[0], p[0]),
        lerp(chunk.min[1], chunk.max[1], p[1]),
        lerp(chunk.min[2], chunk.max[2], p[2]),
    ];
    let scale = [
        lerp(chunk.min_scale[0], chunk.max_scale[0], s[0]),
        lerp(chunk.min_scale[1], chunk.max_scale[1], s[1]),
        lerp(chunk.min_scale[2], chunk.max_scale[2], s[2]),
    ];
    let f_dc = [
        color_to_sh_dc(lerp(chunk.min_color[0], chunk.max_color[0], c[0])),
        color_to_sh_dc(lerp(chunk.min_color[1], chunk.max_color[1], c[1])),
        color_to_sh_dc(lerp(chunk.min_color[2], chunk.max_color[2], c[2])),
    ];

    DecodedSplat {
        position,
        rotation: unpack_rot(packed.rotation),
        scale,
        f_dc,
        opacity: inv_sigmoid(c[3]),
    }
}

#[derive(Debug)]
struct ShColumns<'a> {
    bands: usize,
    coeffs: Vec<&'a [u8]>,
}

/// A validated view over a compressed splat element list.
///
/// Construction checks every column the decode pass reads, so decoding
/// itself cannot fail halfway.
#[derive(Debug)]
pub struct SplatTransformDecoder<'a> {
    num_splats: usize,
    chunks: Vec<Chunk>,
    position: &'a [u32],
    rotation: &'a [u32],
    scale: &'a [u32],
    color: &'a [u32],
    sh: Option<ShColumns<'a>>,
}

fn optional_column<'a>(chunk: &'a Element, name: &str) -> Result<Option<&'a [f32]>, CplyError> {
    if chunk.has_property(name) {
        chunk.f32_column(name).map(Some)
    } else {
        Ok(None)
    }
}

fn load_chunks(chunk: &Element) -> Result<Vec<Chunk>, CplyError> {
    let min_x = chunk.f32_column("min_x")?;
    let min_y = chunk.f32_column("min_y")?;
    let min_z = chunk.f32_column("min_z")?;
    let max_x = chunk.f32_column("max_x")?;
    let max_y = chunk.f32_column("max_y")?;
    let max_z = chunk.f32_column("max_z")?;
    let min_scale_x = chunk.f32_column("min_scale_x")?;
    let min_scale_y = chunk.f32_column("min_scale_y")?;
    let min_scale_z = chunk.f32_column("min_scale_z")?;
    let max_scale_x = chunk.f32_column("max_scale_x")?;
    let max_scale_y = chunk.f32_column("max_scale_y")?;
    let max_scale_z = chunk.f32_column("max_scale_z")?;

    // Color bounds are optional; absent ones keep the identity 0..1 range.
    let min_color = [
        optional_column(chunk, "min_r")?,
        optional_column(chunk, "min_g")?,
        optional_column(chunk, "min_b")?,
    ];
    let max_color = [
        optional_column(chunk, "max_r")?,
        optional_column(chunk, "max_g")?,
        optional_column(chunk, "max_b")?,
    ];

    let chunks = (0..chunk.count())
        .map(|i| Chunk {
            min: [min_x[i], min_y[i], min_z[i]],
            max: [max_x[i], max_y[i], max_z[i]],
            min_scale: [min_scale_x[i], min_scale_y[i], min_scale_z[i]],
            max_scale: [max_scale_x[i], max_scale_y[i], max_scale_z[i]],
            min_color: min_color.map(|c| c.map_or(0.0, |c| c[i])),
            max_color: max_color.map(|c| c.map_or(1.0, |c| c[i])),
        })
        .collect();
    Ok(chunks)
}

fn load_sh<'a>(sh: &'a Element, num_splats: usize) -> Result<Option<ShColumns<'a>>, CplyError> {
    let mut count = 0;
    while sh.has_property(&format!("f_rest_{}", count)) {
        count += 1;
    }
    let bands = sh_bands_for_coeffs(count).ok_or_else(|| {
        CplyError::ShLayout(format!("invalid number of f_rest properties: {}", count))
    })?;
    if bands == 0 {
        return Ok(None);
    }
    if sh.count() != num_splats {
        return Err(CplyError::ShLayout(format!(
            "sh element count ({}) must match vertex count ({})",
            sh.count(), num_splats
        )));
    }
    let coeffs = (0..count)
        .map(|k| sh.u8_column(&format!("f_rest_{}", k)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(ShColumns { bands, coeffs }))
}

impl<'a> SplatTransformDecoder<'a> {
    pub fn new(elements: &'a ElementList, include_sh: bool) -> Result<Self, CplyError> {
        let vertex = elements.required(VERTEX_ELEMENT)?;
        let position = vertex.u32_column("packed_position")?;
        let rotation = vertex.u32_column("packed_rotation")?;
        let scale = vertex.u32_column("packed_scale")?;
        let color = vertex.u32_column("packed_color")?;

        let chunk = elements.required(CHUNK_ELEMENT)?;
        let chunks = load_chunks(chunk)?;

        let num_splats = vertex.count();
        let needed = chunks_for_splats(num_splats);
        if chunks.len() < needed {
            return Err(CplyError::ChunkCount {
                chunks: chunks.len(),
                needed,
            });
        }

        let sh = match elements.element(SH_ELEMENT) {
            Some(sh) if include_sh => load_sh(sh, num_splats)?,
            _ => None,
        };

        Ok(SplatTransformDecoder {
            num_splats,
            chunks,
            position,
            rotation,
            scale,
            color,
            sh,
        })
    }

    pub fn num_splats(&self) -> usize {
        self.num_splats
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn sh_bands(&self) -> usize {
        self.sh.as_ref().map_or(0, |sh| sh.bands)
    }

    #[inline]
    pub fn chunk_index(splat_index: usize) -> usize {
        splat_index / CHUNK_SIZE
    }

    #[inline]
    pub fn chunk_for(&self, splat_index: usize) -> &Chunk {
        &self.chunks[Self::chunk_index(splat_index)]
    }

    #[inline]
    pub fn packed(&self, splat_index: usize) -> PackedSplat {
        PackedSplat {
            position: self.position[splat_index],
            rotation: self.rotation[splat_index],
            scale: self.scale[splat_index],
            color: self.color[splat_index],
        }
    }

    /// Decodes a single splat. Panics if `splat_index >= num_splats()`.
    #[inline]
    pub fn decode_splat(&self, splat_index: usize) -> DecodedSplat {
        decode_splat(&self.packed(splat_index), self.chunk_for(splat_index))
    }

    fn decode_all(&self) -> DecodedSplats {
        let n = self.num_splats;
        let mut columns: [Vec<f32>; OUTPUT_COLUMNS] = std::array::from_fn(|_| vec![0.0; n]);
        {
            // One block of disjoint column slices per chunk.
            let mut chunked = columns.each_mut().map(|c| c.chunks_mut(CHUNK_SIZE));
            let blocks: Vec<[&mut [f32]; OUTPUT_COLUMNS]> = (0..chunks_for_splats(n))
                .map(|_| chunked.each_mut().map(|it| it.next().unwrap_or_default()))
                .collect();

            blocks
                .into_par_iter()
                .enumerate()
                .for_each(|(ci, mut block)| {
                    let start = ci * CHUNK_SIZE;
                    for j in 0..block[0].len() {
                        let s = self.decode_splat(start + j);
                        let values = [
                            s.position[0],
                            s.position[1],
                            s.position[2],
                            s.f_dc[0],
                            s.f_dc[1],
                            s.f_dc[2],
                            s.opacity,
                            s.rotation[0],
                            s.rotation[1],
                            s.rotation[2],
                            s.rotation[3],
                            s.scale[0],
                            s.scale[1],
                            s.scale[2],
                        ];
                        for (column, v) in block.iter_mut().zip(values) {
                            column[j] = v;
                        }
                    }
                });
        }

        let f_rest: Vec<Vec<f32>> = match &self.sh {
            Some(sh) => sh
                .coeffs
                .par_iter()
                .map(|column| column.iter().map(|&v| unquantize_sh(v)).collect::<Vec<f32>>())
                .collect(),
            None => Vec::new(),
        };

        let [
            x,
            y,
            z,
            f_dc_0,
            f_dc_1,
            f_dc_2,
            opacity,
            rot_0,
            rot_1,
            rot_2,
            rot_3,
            scale_0,
            scale_1,
            scale_2,
        ] = columns;
        DecodedSplats {
            num_splats: n,
            sh_bands: self.sh_bands(),
            x,
            y,
            z,
            f_dc_0,
            f_dc_1,
            f_dc_2,
            opacity,
            rot_0,
            rot_1,
            rot_2,
            rot_3,
            scale_0,
            scale_1,
            scale_2,
            f_rest,
        }
    }

    /// Decodes every splat; `workers > 0` runs on a dedicated pool of that size.
    #[inline(never)]
    pub fn decode(&self, workers: u32) -> Result<DecodedSplats, CplyError> {
        let _span = tracing::trace_span!("decode_splats", splats = self.num_splats).entered();
        tracing::debug!(
            splats = self.num_splats,
            chunks = self.chunks.len(),
            sh_bands = self.sh_bands(),
            workers,
            "decoding compressed splats"
        );

        if workers == 0 {
            return Ok(self.decode_all());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers as usize)
            .build()
            .map_err(|e| CplyError::ThreadPool(e.to_string()))?;
        Ok(pool.install(|| self.decode_all()))
    }
}

/// Expands a compressed splat element list into uncompressed float columns.
pub fn decompress(elements: &ElementList) -> Result<DecodedSplats, CplyError> {
    decompress_with(elements, &DecodeOptions::default())
}

pub fn decompress_with(
    elements: &ElementList,
    options: &DecodeOptions,
) -> Result<DecodedSplats, CplyError> {
    SplatTransformDecoder::new(elements, options.include_sh)?.decode(options.workers)
}

/// Whether `elements` looks like a chunk-compressed splat file.
pub fn is_compressed(elements: &ElementList) -> bool {
    elements.element(CHUNK_ELEMENT).is_some()
        && elements
            .element(VERTEX_ELEMENT)
            .is_some_and(|v| v.has_property("packed_position"))
}

impl DecodedSplats {
    pub fn from_records(records: &[DecodedSplat], f_rest: Vec<Vec<f32>>, sh_bands: usize) -> Self {
        let column = |f: &dyn Fn(&DecodedSplat) -> f32| records.iter().map(f).collect::<Vec<_>>();
        DecodedSplats {
            num_splats: records.len(),
            sh_bands,
            x: column(&|s| s.position[0]),
            y: column(&|s| s.position[1]),
            z: column(&|s| s.position[2]),
            f_dc_0: column(&|s| s.f_dc[0]),
            f_dc_1: column(&|s| s.f_dc[1]),
            f_dc_2: column(&|s| s.f_dc[2]),
            opacity: column(&|s| s.opacity),
            rot_0: column(&|s| s.rotation[0]),
            rot_1: column(&|s| s.rotation[1]),
            rot_2: column(&|s| s.rotation[2]),
            rot_3: column(&|s| s.rotation[3]),
            scale_0: column(&|s| s.scale[0]),
            scale_1: column(&|s| s.scale[1]),
            scale_2: column(&|s| s.scale[2]),
            f_rest,
        }
    }

    pub fn splat(&self, i: usize) -> Option<DecodedSplat> {
        if i >= self.num_splats {
            return None;
        }
        Some(DecodedSplat {
            position: [self.x[i], self.y[i], self.z[i]],
            rotation: [self.rot_0[i], self.rot_1[i], self.rot_2[i], self.rot_3[i]],
            scale: [self.scale_0[i], self.scale_1[i], self.scale_2[i]],
            f_dc: [self.f_dc_0[i], self.f_dc_1[i], self.f_dc_2[i]],
            opacity: self.opacity[i],
        })
    }

    /// Interleaved `xyz` centers.
    pub fn centers(&self) -> Vec<f32> {
        (0..self.num_splats)
            .flat_map(|i| [self.x[i], self.y[i], self.z[i]])
            .collect()
    }

    /// Bounds of every splat's 3-sigma box, rotated into world space.
    pub fn aabb(&self) -> Option<Aabb> {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..self.num_splats {
            let center = Vec3::new(self.x[i], self.y[i], self.z[i]);
            // rot_0 is w.
            let q = Quat::from_xyzw(self.rot_1[i], self.rot_2[i], self.rot_3[i], self.rot_0[i]);
            let q = if q.length_squared() > 0.0 {
                q.normalize()
            } else {
                Quat::IDENTITY
            };
            let scale = Vec3::new(
                self.scale_0[i].exp(),
                self.scale_1[i].exp(),
                self.scale_2[i].exp(),
            ) * 3.0;
            let m = Mat3::from_quat(q);
            let half = m.x_axis.abs() * scale.x + m.y_axis.abs() * scale.y + m.z_axis.abs() * scale.z;
            if !(center.is_finite() && half.is_finite()) {
                continue;
            }
            min = min.min(center - half);
            max = max.max(center + half);
        }
        if min.x > max.x {
            return None;
        }
        Some(Aabb {
            min: min.to_array(),
            max: max.to_array(),
        })
    }

    /// Converts the columns into a single `vertex` element, optionally with
    /// zeroed `nx, ny, nz` normals after the position.
    pub fn into_element_list(self, include_normals: bool) -> Result<ElementList, CplyError> {
        let n = self.num_splats;
        let mut vertex = Element::new(VERTEX_ELEMENT, n)
            .with_property("x", PropertyData::Float(self.x))?
            .with_property("y", PropertyData::Float(self.y))?
            .with_property("z", PropertyData::Float(self.z))?;
        if include_normals {
            for name in ["nx", "ny", "nz"] {
                vertex.add_property(name, PropertyData::Float(vec![0.0; n]))?;
            }
        }
        vertex.add_property("f_dc_0", PropertyData::Float(self.f_dc_0))?;
        vertex.add_property("f_dc_1", PropertyData::Float(self.f_dc_1))?;
        vertex.add_property("f_dc_2", PropertyData::Float(self.f_dc_2))?;
        for (k, column) in self.f_rest.into_iter().enumerate() {
            vertex.add_property(format!("f_rest_{}", k), PropertyData::Float(column))?;
        }
        vertex.add_property("opacity", PropertyData::Float(self.opacity))?;
        vertex.add_property("rot_0", PropertyData::Float(self.rot_0))?;
        vertex.add_property("rot_1", PropertyData::Float(self.rot_1))?;
        vertex.add_property("rot_2", PropertyData::Float(self.rot_2))?;
        vertex.add_property("rot_3", PropertyData::Float(self.rot_3))?;
        vertex.add_property("scale_0", PropertyData::Float(self.scale_0))?;
        vertex.add_property("scale_1", PropertyData::Float(self.scale_1))?;
        vertex.add_property("scale_2", PropertyData::Float(self.scale_2))?;
        Ok(ElementList::new(vec![vertex]))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::tests::{pack_111011, pack_8888, pack_rot};

    pub(crate) const CHUNK_BOUNDS: [&str; 12] = [
        "min_x",
        "min_y",
        "min_z",
        "max_x",
        "max_y",
        "max_z",
        "min_scale_x",
        "min_scale_y",
        "min_scale_z",
        "max_scale_x",
        "max_scale_y",
        "max_scale_z",
    ];

    /// Compressed element list with every chunk using `bounds` (in
    /// `CHUNK_BOUNDS` order) and one packed word per column per splat.
    pub(crate) fn compressed(
        chunk_bounds: &[[f32; 12]],
        packed: &[PackedSplat],
    ) -> ElementList {
        let mut chunk = Element::new(CHUNK_ELEMENT, chunk_bounds.len());
        for (k, name) in CHUNK_BOUNDS.iter().enumerate() {
            let column = chunk_bounds.iter().map(|b| b[k]).collect();
            chunk.add_property(*name, PropertyData::Float(column)).unwrap();
        }
        let vertex = Element::new(VERTEX_ELEMENT, packed.len())
            .with_property(
                "packed_position",
                PropertyData::Uint(packed.iter().map(|p| p.position).collect()),
            )
            .unwrap()
            .with_property(
                "packed_rotation",
                PropertyData::Uint(packed.iter().map(|p| p.rotation).collect()),
            )
            .unwrap()
            .with_property(
                "packed_scale",
                PropertyData::Uint(packed.iter().map(|p| p.scale).collect()),
            )
            .unwrap()
            .with_property(
                "packed_color",
                PropertyData::Uint(packed.iter().map(|p| p.color).collect()),
            )
            .unwrap();
        ElementList::new(vec![chunk, vertex])
    }

    pub(crate) const UNIT_BOUNDS: [f32; 12] = [0., 0., 0., 1., 1., 1., 0., 0., 0., 1., 1., 1.];

    fn zero_packed() -> PackedSplat {
        PackedSplat {
            position: 0,
            rotation: 0,
            scale: 0,
            color: 0,
        }
    }

    #[test]
    fn test_single_chunk_end_to_end() {
        let mut bounds = UNIT_BOUNDS;
        bounds[0] = -1.0;
        bounds[3] = 1.0;
        let elements = compressed(&[bounds], &[zero_packed()]);

        let out = decompress(&elements).expect("decompress failed");
        assert_eq!(out.num_splats, 1);
        assert_eq!(out.x, vec![-1.0]);
        assert_eq!(out.y, vec![0.0]);
        assert_eq!(out.z, vec![0.0]);
    }

    #[test]
    fn test_missing_packed_column_is_named() {
        let mut elements = compressed(&[UNIT_BOUNDS], &[zero_packed()]);
        let vertex = &mut elements.elements[1];
        *vertex = Element::new(VERTEX_ELEMENT, 1)
            .with_property("packed_position", PropertyData::Uint(vec![0]))
            .unwrap()
            .with_property("packed_rotation", PropertyData::Uint(vec![0]))
            .unwrap()
            .with_property("packed_color", PropertyData::Uint(vec![0]))
            .unwrap();

        match decompress(&elements) {
            Err(CplyError::MissingProperty { element, property }) => {
                assert_eq!(element, "vertex");
                assert_eq!(property, "packed_scale");
            }
            other => panic!("expected MissingProperty, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_chunk_bound_is_named() {
        let mut chunk = Element::new(CHUNK_ELEMENT, 1);
        for name in CHUNK_BOUNDS.iter().filter(|n| **n != "max_scale_y") {
            chunk.add_property(*name, PropertyData::Float(vec![0.0])).unwrap();
        }
        let mut elements = compressed(&[UNIT_BOUNDS], &[zero_packed()]);
        elements.elements[0] = chunk;

        let err = decompress(&elements).unwrap_err();
        assert!(matches!(
            err,
            CplyError::MissingProperty { ref property, .. } if property == "max_scale_y"
        ));
    }

    #[test]
    fn test_missing_elements() {
        let elements = compressed(&[UNIT_BOUNDS], &[zero_packed()]);
        let only_vertex = ElementList::new(vec![elements.elements[1].clone()]);
        assert!(matches!(
            decompress(&only_vertex),
            Err(CplyError::MissingElement(ref e)) if e == "chunk"
        ));
        assert!(matches!(
            decompress(&ElementList::default()),
            Err(CplyError::MissingElement(ref e)) if e == "vertex"
        ));
    }

    #[test]
    fn test_wrong_column_type() {
        let mut elements = compressed(&[UNIT_BOUNDS], &[zero_packed()]);
        elements.elements[1]
            .add_property("packed_color", PropertyData::Float(vec![0.0]))
            .unwrap();
        assert!(matches!(
            decompress(&elements),
            Err(CplyError::PropertyType { expected: "uint", found: "float", .. })
        ));
    }

    #[test]
    fn test_chunk_count_too_small() {
        let elements = compressed(&[UNIT_BOUNDS], &vec![zero_packed(); 257]);
        assert!(matches!(
            decompress(&elements),
            Err(CplyError::ChunkCount { chunks: 1, needed: 2 })
        ));
    }

    #[test]
    fn test_chunk_boundary_at_256() {
        let mut second = UNIT_BOUNDS;
        second[0] = 10.0;
        second[3] = 11.0;
        let elements = compressed(&[UNIT_BOUNDS, second], &vec![zero_packed(); 257]);

        let decoder = SplatTransformDecoder::new(&elements, true).unwrap();
        assert_eq!(decoder.num_splats(), 257);
        assert_eq!(decoder.num_chunks(), 2);
        assert_eq!(decoder.chunk_for(256).min[0], 10.0);
        assert_eq!(SplatTransformDecoder::chunk_index(255), 0);
        assert_eq!(SplatTransformDecoder::chunk_index(256), 1);

        let out = decoder.decode(0).unwrap();
        assert_eq!(out.x[255], 0.0);
        assert_eq!(out.x[256], 10.0);
    }

    #[test]
    fn test_rotation_written_in_slot_order() {
        let q = [0.2, 0.9, -0.3, 0.1];
        let packed = PackedSplat {
            rotation: pack_rot(q),
            ..zero_packed()
        };
        let out = decompress(&compressed(&[UNIT_BOUNDS], &[packed])).unwrap();
        let len = q.iter().map(|c| c * c).sum::<f32>().sqrt();
        let got = [out.rot_0[0], out.rot_1[0], out.rot_2[0], out.rot_3[0]];
        for k in 0..4 {
            assert!((got[k] - q[k] / len).abs() < 2e-3, "rot_{} = {}", k, got[k]);
        }
    }

    #[test]
    fn test_color_bounds_and_opacity() {
        let packed = PackedSplat {
            color: pack_8888([1.0, 0.0, 1.0, 1.0]),
            ..zero_packed()
        };
        let mut elements = compressed(&[UNIT_BOUNDS], &[packed]);
        let chunk = &mut elements.elements[0];
        for (name, v) in [
            ("min_r", 0.5),
            ("min_g", 0.5),
            ("min_b", 0.0),
            ("max_r", 0.5),
            ("max_g", 1.0),
            ("max_b", 0.5),
        ] {
            chunk.add_property(name, PropertyData::Float(vec![v])).unwrap();
        }

        let out = decompress(&elements).unwrap();
        assert_eq!(out.f_dc_0[0], 0.0);
        assert!((out.f_dc_1[0] - 0.0).abs() < 1e-6);
        assert_eq!(out.f_dc_2[0], 0.0);
        assert_eq!(out.opacity[0], f32::INFINITY);
    }

    #[test]
    fn test_scale_bounds() {
        let packed = PackedSplat {
            scale: pack_111011([1.0, 0.0, 0.5]),
            ..zero_packed()
        };
        let mut bounds = UNIT_BOUNDS;
        bounds[6..12].copy_from_slice(&[-4.0, -4.0, -4.0, 2.0, 2.0, 2.0]);
        let out = decompress(&compressed(&[bounds], &[packed])).unwrap();
        assert_eq!(out.scale_0[0], 2.0);
        assert_eq!(out.scale_1[0], -4.0);
        assert!((out.scale_2[0] - -1.0).abs() < 6.0 / 2047.0);
    }

    fn with_sh(elements: &mut ElementList, count: usize, coeffs: usize, value: u8) {
        let mut sh = Element::new(SH_ELEMENT, count);
        for k in 0..coeffs {
            sh.add_property(format!("f_rest_{}", k), PropertyData::Uchar(vec![value; count]))
                .unwrap();
        }
        elements.elements.push(sh);
    }

    #[test]
    fn test_sh_bands_decoded() {
        let mut elements = compressed(&[UNIT_BOUNDS], &[zero_packed(); 2]);
        with_sh(&mut elements, 2, 24, 255);

        let out = decompress(&elements).unwrap();
        assert_eq!(out.sh_bands, 2);
        assert_eq!(out.f_rest.len(), 24);
        assert!(out.f_rest.iter().all(|c| c == &vec![4.0, 4.0]));

        let skipped = decompress_with(
            &elements,
            &DecodeOptions {
                include_sh: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(skipped.sh_bands, 0);
        assert!(skipped.f_rest.is_empty());
    }

    #[test]
    fn test_sh_layout_errors() {
        let mut elements = compressed(&[UNIT_BOUNDS], &[zero_packed(); 2]);
        with_sh(&mut elements, 2, 10, 0);
        assert!(matches!(decompress(&elements), Err(CplyError::ShLayout(_))));

        let mut elements = compressed(&[UNIT_BOUNDS], &[zero_packed(); 2]);
        with_sh(&mut elements, 1, 9, 0);
        assert!(matches!(decompress(&elements), Err(CplyError::ShLayout(_))));
    }

    #[test]
    fn test_dedicated_pool_matches_global() {
        let packed: Vec<PackedSplat> = (0..600u32)
            .map(|i| PackedSplat {
                position: i.wrapping_mul(2_654_435_761),
                rotation: pack_rot([1.0, i as f32 * 0.01, 0.2, -0.1]),
                scale: i.wrapping_mul(40_503),
                color: i.wrapping_mul(97_531) | 0x80,
            })
            .collect();
        let elements = compressed(&[UNIT_BOUNDS; 3], &packed);
        let decoder = SplatTransformDecoder::new(&elements, true).unwrap();
        assert_eq!(decoder.decode(0).unwrap(), decoder.decode(2).unwrap());
    }

    #[test]
    fn test_into_element_list_order() {
        let elements = compressed(&[UNIT_BOUNDS], &[zero_packed()]);
        let list = decompress(&elements)
            .unwrap()
            .into_element_list(false)
            .unwrap();
        let names: Vec<&str> = list.elements[0]
            .properties()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "rot_0", "rot_1",
                "rot_2", "rot_3", "scale_0", "scale_1", "scale_2"
            ]
        );
    }

    #[test]
    fn test_aabb_identity_rotation() {
        let splats = DecodedSplats::from_records(
            &[DecodedSplat {
                position: [1.0, 0.0, 0.0],
                rotation: [1.0, 0.0, 0.0, 0.0],
                scale: [0.0, 0.0, 0.0],
                ..Default::default()
            }],
            Vec::new(),
            0,
        );
        let aabb = splats.aabb().unwrap();
        assert_eq!(aabb.min, [-2.0, -3.0, -3.0]);
        assert_eq!(aabb.max, [4.0, 3.0, 3.0]);
        assert_eq!(aabb.center(), [1.0, 0.0, 0.0]);
        assert_eq!(aabb.half_extents(), [3.0, 3.0, 3.0]);
        assert_eq!(splats.centers(), vec![1.0, 0.0, 0.0]);
        assert!(DecodedSplats::default().aabb().is_none());
    }

    fn assert_close(actual: [f32; 3], expected: [f32; 3]) {
        for k in 0..3 {
            assert!(
                (actual[k] - expected[k]).abs() < 1e-5,
                "axis {}: {:?} vs {:?}",
                k,
                actual,
                expected
            );
        }
    }

    #[test]
    fn test_aabb_rotated_extents() {
        use std::f32::consts::{FRAC_1_SQRT_2, LN_2};

        // 90 degrees about z: local x lands on world y, local y on world x.
        let quarter_turn = DecodedSplats::from_records(
            &[DecodedSplat {
                rotation: [FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2],
                scale: [0.0, LN_2, 0.0],
                ..Default::default()
            }],
            Vec::new(),
            0,
        );
        let aabb = quarter_turn.aabb().unwrap();
        assert_close(aabb.min, [-6.0, -3.0, -3.0]);
        assert_close(aabb.max, [6.0, 3.0, 3.0]);

        // 120 degrees about (1, 1, 1): x -> y, y -> z, z -> x.
        let cycle = DecodedSplats::from_records(
            &[DecodedSplat {
                rotation: [0.5, 0.5, 0.5, 0.5],
                scale: [0.0, LN_2, 2.0 * LN_2],
                ..Default::default()
            }],
            Vec::new(),
            0,
        );
        assert_close(cycle.aabb().unwrap().half_extents(), [12.0, 3.0, 6.0]);
    }

    #[test]
    fn test_aabb_skips_non_finite_splats() {
        let splats = DecodedSplats::from_records(
            &[
                DecodedSplat {
                    rotation: [1.0, 0.0, 0.0, 0.0],
                    ..Default::default()
                },
                DecodedSplat {
                    position: [100.0, 100.0, 100.0],
                    rotation: [1.0, 0.0, 0.0, 0.0],
                    scale: [f32::INFINITY, 0.0, 0.0],
                    ..Default::default()
                },
                DecodedSplat {
                    position: [-50.0, 0.0, 0.0],
                    rotation: [1.0, 0.0, 0.0, 0.0],
                    scale: [0.0, f32::NAN, 0.0],
                    ..Default::default()
                },
            ],
            Vec::new(),
            0,
        );
        let aabb = splats.aabb().unwrap();
        assert_eq!(aabb.min, [-3.0, -3.0, -3.0]);
        assert_eq!(aabb.max, [3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_into_element_list_order_with_sh_and_normals() {
        let mut elements = compressed(&[UNIT_BOUNDS], &[zero_packed(); 3]);
        let mut sh = Element::new(SH_ELEMENT, 3);
        for k in 0..9u8 {
            let column = vec![k * 20, 255 - k, k];
            sh.add_property(format!("f_rest_{}", k), PropertyData::Uchar(column))
                .unwrap();
        }
        elements.elements.push(sh);

        let out = decompress(&elements).unwrap();
        assert_eq!(out.sh_bands, 1);
        let f_rest = out.f_rest.clone();
        let list = out.into_element_list(true).unwrap();

        let mut expected: Vec<String> = ["x", "y", "z", "nx", "ny", "nz", "f_dc_0", "f_dc_1", "f_dc_2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        expected.extend((0..9).map(|k| format!("f_rest_{}", k)));
        expected.extend(
            ["opacity", "rot_0", "rot_1", "rot_2", "rot_3", "scale_0", "scale_1", "scale_2"]
                .iter()
                .map(|s| s.to_string()),
        );
        let names: Vec<&str> = list.elements[0]
            .properties()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, expected);

        let mut raw = Vec::new();
        crate::ply::write_ply(&mut raw, &list).unwrap();
        let reparsed = crate::ply::parse_ply(&raw).unwrap();
        let vertex = reparsed.element(VERTEX_ELEMENT).unwrap();
        for (k, column) in f_rest.iter().enumerate() {
            let name = format!("f_rest_{}", k);
            assert_eq!(vertex.f32_column(&name).unwrap(), column.as_slice(), "{}", name);
        }
        assert_eq!(vertex.f32_column("f_rest_0").unwrap()[1], unquantize_sh(255));
    }

    #[test]
    fn test_columns_match_per_splat_decode() {
        // Uneven tail: the last chunk holds 44 splats.
        let packed: Vec<PackedSplat> = (0..300u32)
            .map(|i| PackedSplat {
                position: i.wrapping_mul(2_654_435_761),
                rotation: pack_rot([0.3, -0.5, i as f32 * 0.01, 0.8]),
                scale: i.wrapping_mul(40_503),
                color: i.wrapping_mul(97_531),
            })
            .collect();
        let mut second = UNIT_BOUNDS;
        second[0] = -4.0;
        let elements = compressed(&[UNIT_BOUNDS, second], &packed);
        let decoder = SplatTransformDecoder::new(&elements, true).unwrap();
        let out = decoder.decode(0).unwrap();

        assert_eq!(out.num_splats, 300);
        for i in 0..300 {
            let expected = decoder.decode_splat(i);
            let actual = out.splat(i).unwrap();
            assert_eq!(actual.position, expected.position, "splat {}", i);
            assert_eq!(actual.rotation, expected.rotation, "splat {}", i);
            assert_eq!(actual.scale, expected.scale, "splat {}", i);
            assert_eq!(actual.f_dc, expected.f_dc, "splat {}", i);
            assert!(
                actual.opacity == expected.opacity
                    || (actual.opacity.is_nan() && expected.opacity.is_nan()),
                "splat {}",
                i
            );
        }
    }

    #[test]
    fn test_is_compressed() {
        let elements = compressed(&[UNIT_BOUNDS], &[zero_packed()]);
        assert!(is_compressed(&elements));
        assert!(!is_compressed(&ElementList::default()));
    }
}
