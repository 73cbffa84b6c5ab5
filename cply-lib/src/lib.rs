pub mod common;
pub mod decoder;
pub mod error;
pub mod ply;
mod structures;

pub use decoder::decode_splat;
pub use decoder::decompress;
pub use decoder::decompress_with;
pub use decoder::is_compressed;
pub use decoder::DecodeOptions;
pub use decoder::SplatTransformDecoder;
pub use error::CplyError;
pub use ply::parse_ply;
pub use ply::write_ply;
pub use structures::Aabb;
pub use structures::Chunk;
pub use structures::DecodedSplat;
pub use structures::DecodedSplats;
pub use structures::Element;
pub use structures::ElementList;
pub use structures::PackedSplat;
pub use structures::Property;
pub use structures::PropertyData;
pub use structures::PropertyType;

fn decode_parsed(
    elements: &ElementList,
    options: &DecodeOptions,
    include_normals: bool,
    output: &mut Vec<u8>,
) -> Result<(), CplyError> {
    let decoder = SplatTransformDecoder::new(elements, options.include_sh)?;
    if decoder.num_splats() == 0 {
        return Err(CplyError::EmptySplats);
    }
    let splats = decoder.decode(options.workers)?;
    let decoded = splats.into_element_list(include_normals)?;
    write_ply(output, &decoded)
}

/// Reads a compressed splat PLY from `raw_data` and writes the expanded,
/// standard splat PLY into `output`.
pub fn decompress_ply(
    raw_data: &[u8],
    options: &DecodeOptions,
    include_normals: bool,
    output: &mut Vec<u8>,
) -> Result<(), CplyError> {
    let elements = parse_ply(raw_data)?;
    decode_parsed(&elements, options, include_normals, output)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use tokio::io::{AsyncRead, AsyncReadExt};

    #[inline(never)]
    pub async fn decompress_ply_async<R: AsyncRead + Unpin>(
        mut reader: R,
        options: DecodeOptions,
        include_normals: bool,
    ) -> Result<Vec<u8>, CplyError> {
        let mut raw_data = Vec::new();
        reader.read_to_end(&mut raw_data).await?;

        tokio::task::spawn_blocking(move || {
            let mut output = Vec::new();
            decompress_ply(&raw_data, &options, include_normals, &mut output)?;
            Ok::<_, CplyError>(output)
        })
        .await
        .map_err(|e| CplyError::IoError(std::io::Error::other(e)))?
    }
}
}
