use std::path::Path;

use crate::data_structures::texture::TextureData;

/// Read a file relative to `root`.
pub fn load_binary(root: &Path, file_name: &str) -> anyhow::Result<Vec<u8>> {
    let path = root.join(file_name);
    // TODO: async loading once hosts run an executor
    let data = std::fs::read(&path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    Ok(data)
}

/// Load and decode an image file relative to `root`.
///
/// The file extension is used as a format hint.
pub fn load_texture(root: &Path, file_name: &str, is_normal_map: bool) -> anyhow::Result<TextureData> {
    let data = load_binary(root, file_name)?;
    let format = Path::new(file_name).extension().and_then(|ext| ext.to_str());
    let mut texture = TextureData::from_bytes(&data, file_name, format)?;
    texture.is_normal_map = is_normal_map;
    Ok(texture)
}
