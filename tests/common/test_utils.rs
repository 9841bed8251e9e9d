use std::{io::Cursor, path::PathBuf};

use flow_scene::{
    config::{ConfigGroup, ConfigRef},
    data_structures::mesh::{MeshData, MeshVertex},
};
use image::{ImageFormat, Rgba, RgbaImage};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A PNG of a single colour.
pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("failed to encode png");
    bytes.into_inner()
}

/// A fresh directory under the system temp dir holding the given files.
pub fn asset_dir(test: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("flow-scene-{}-{}", test, std::process::id()));
    std::fs::create_dir_all(&dir).expect("failed to create asset dir");
    for (name, contents) in files {
        std::fs::write(dir.join(name), contents).expect("failed to write asset");
    }
    dir
}

pub fn triangle(name: &str) -> MeshData {
    MeshData::new(
        name,
        vec![
            MeshVertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            MeshVertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            MeshVertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ],
        vec![0, 1, 2],
    )
}

/// A collection with an empty `scene` group.
pub fn collection() -> (ConfigRef, ConfigRef) {
    let collection = ConfigGroup::shared("collection");
    let scene = collection.borrow_mut().add_group("scene");
    (collection, scene)
}

pub fn child(parent: &ConfigRef, name: &str) -> ConfigRef {
    let record = parent.borrow_mut().add_group("child");
    record.borrow_mut().set_value("name", name.to_string());
    record
}

pub fn feature(object: &ConfigRef, type_name: &str) -> ConfigRef {
    let record = object.borrow_mut().add_group("feature");
    record
        .borrow_mut()
        .set_value("type", type_name.to_string());
    record
}

/// Serialized form of a record, for comparing whole trees.
pub fn snapshot(record: &ConfigRef) -> String {
    ron::to_string(&*record.borrow()).expect("failed to serialize record")
}
