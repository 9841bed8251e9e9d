mod common;

use common::test_utils::{asset_dir, child, collection, feature, init_logger, png};
use flow_scene::{
    SceneBuilder,
    backend::HeadlessBackend,
    context::Context,
    data_structures::{feature::FeatureKind, scene_graph::SceneGraph},
    resources::cache::ResourcePolicy,
    settings::{AssetDefaults, SceneSettings},
};

#[test]
fn identical_features_share_one_mesh_and_one_shader() {
    init_logger();
    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    let (collection, scene) = collection();
    for name in ["a", "b", "c"] {
        let object = child(&scene, name);
        feature(&object, "mesh");
    }

    let report = {
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        builder.build_collection(&collection);
        builder.finish()
    };
    assert!(report.is_clean(), "{:?}", report.diagnostics);

    let stats = ctx.backend.stats();
    assert_eq!(stats.mesh_uploads(), 1);
    assert_eq!(stats.shader_compiles(), 1);
    assert_eq!(ctx.cache.references("primitive:cube"), Some(3));

    let meshes: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            let node = graph.find_by_name(name).unwrap();
            let key = graph.feature_of(node, FeatureKind::Mesh);
            graph.feature(key).unwrap().feature.as_mesh().unwrap().mesh.clone()
        })
        .collect();
    assert!(meshes[0].ptr_eq(&meshes[1]));
    assert!(meshes[1].ptr_eq(&meshes[2]));
}

#[test]
fn sprites_load_their_texture_once() {
    init_logger();
    let root = asset_dir("sprites", &[("player.png", &png(4, 4, [255, 0, 0, 255])[..])]);
    let settings = SceneSettings {
        assets: AssetDefaults { root },
        ..Default::default()
    };
    let mut ctx = Context::new(HeadlessBackend::new(), settings);
    let mut graph = SceneGraph::new();
    let (collection, scene) = collection();
    for name in ["left", "right"] {
        let object = child(&scene, name);
        feature(&object, "sprite")
            .borrow_mut()
            .set_value("texture", String::from("player.png"));
    }

    let report = {
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        builder.build_collection(&collection);
        builder.finish()
    };
    assert!(report.is_clean(), "{:?}", report.diagnostics);
    assert_eq!(ctx.backend.stats().texture_uploads(), 1);
    assert_eq!(ctx.cache.references("player.png"), Some(2));
}

#[test]
fn missing_textures_are_reported_and_left_out() {
    init_logger();
    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    let (collection, scene) = collection();
    let object = child(&scene, "crate");
    let mesh = feature(&object, "mesh");
    let material = mesh.borrow_mut().add_group("material");
    material
        .borrow_mut()
        .set_value("diffuse_texture", String::from("missing.png"));
    material.borrow_mut().set_value("alpha_mode", String::from("mask"));

    let report = {
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        builder.build_collection(&collection);
        builder.finish()
    };
    assert_eq!(report.warnings().count(), 1);
    assert_eq!(report.errors().count(), 0);

    let node = graph.find_by_name("crate").unwrap();
    let key = graph.feature_of(node, FeatureKind::Mesh);
    let mesh = graph.feature(key).unwrap().feature.as_mesh().unwrap();
    assert!(mesh.material.diffuse_texture.is_none());
    assert!(mesh.material.flags().is_empty());
    assert!(!ctx.cache.contains("missing.png"));
}

#[test]
fn removed_objects_release_their_resources() {
    init_logger();
    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    let (collection, scene) = collection();
    let object = child(&scene, "ball");
    feature(&object, "mesh")
        .borrow_mut()
        .add_group("primitive")
        .borrow_mut()
        .set_value("type", String::from("sphere"));

    let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
    builder.build_collection(&collection);
    let grid = builder.create_grid().unwrap();
    let root = builder.graph().root();
    let scratch = builder.add_object(root, "scratch");
    builder.remove_object(scratch);
    let report = builder.finish();
    assert!(report.is_clean(), "{:?}", report.diagnostics);

    let node = graph.find_by_name("ball").unwrap();
    let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
    builder.remove_object(node);
    drop(builder);
    assert!(graph.find_by_name("ball").is_none());
    assert!(scene.borrow().groups("child").is_empty());

    ctx.free();
    assert!(!ctx.cache.contains("primitive:sphere:16x32"));
    // The grid is managed by hand and outlives free().
    assert_eq!(ctx.cache.policy("grid"), Some(ResourcePolicy::Manual));
    drop(grid);
    ctx.free();
    assert!(ctx.cache.contains("grid"));
    assert!(ctx.cache.remove("grid"));
}
