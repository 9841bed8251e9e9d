mod common;

use cgmath::{Deg, Matrix4, Quaternion, Rotation3, Vector3};
use common::test_utils::{asset_dir, child, collection, feature, init_logger, png, snapshot};
use flow_scene::{
    SceneBuilder,
    backend::HeadlessBackend,
    config::ConfigRef,
    context::Context,
    data_structures::{
        feature::{Feature, FeatureKind},
        scene_graph::SceneGraph,
    },
    errors::BuildError,
    render::{self, DrawMaterial},
    resources::primitives::Primitive,
    settings::{AssetDefaults, SceneSettings},
};

fn build(ctx: &mut Context, graph: &mut SceneGraph, collection: &ConfigRef) -> flow_scene::BuildReport {
    let mut builder = SceneBuilder::new(ctx, graph);
    builder.build_collection(collection);
    builder.finish()
}

fn names(graph: &SceneGraph, parent: flow_scene::NodeKey) -> Vec<String> {
    graph
        .node(parent)
        .unwrap()
        .children()
        .iter()
        .map(|&c| graph.node(c).unwrap().name.clone())
        .collect()
}

#[test]
fn defaults_are_written_on_the_first_build_only() {
    init_logger();
    let (collection, scene) = collection();
    let lamp = child(&scene, "lamp");
    feature(&lamp, "light");
    let cam = child(&scene, "cam");
    feature(&cam, "camera");
    let box_record = child(&scene, "box");
    feature(&box_record, "mesh");

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    let report = build(&mut ctx, &mut graph, &collection);
    assert!(report.is_clean(), "{:?}", report.diagnostics);
    assert!(lamp.borrow().has_value("transformation"));
    let light = lamp.borrow().group("feature").unwrap();
    assert_eq!(light.borrow().value::<String>("kind").as_deref(), Some("point"));

    let first = snapshot(&collection);
    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);
    assert_eq!(snapshot(&collection), first);
}

#[test]
fn present_values_are_never_redefaulted() {
    init_logger();
    let (collection, scene) = collection();
    let lamp = child(&scene, "lamp");
    let light = feature(&lamp, "light");
    light.borrow_mut().set_value("intensity", 4.0f32);
    light.borrow_mut().set_value("color", [0.5f32, 0.25, 1.0]);

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);

    let node = graph.find_by_name("lamp").unwrap();
    let key = graph.feature_of(node, FeatureKind::Light);
    let light = graph.feature(key).unwrap().feature.as_light().unwrap();
    assert_eq!(light.intensity, 4.0);
    assert_eq!(light.color, [0.5, 0.25, 1.0]);
}

#[test]
fn children_keep_their_record_order() {
    init_logger();
    let (collection, scene) = collection();
    for name in ["zeta", "alpha", "mid"] {
        let object = child(&scene, name);
        for sub in ["2", "1"] {
            child(&object, &format!("{}.{}", name, sub));
        }
    }
    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);

    assert_eq!(names(&graph, graph.root()), ["zeta", "alpha", "mid"]);
    let alpha = graph.find_by_name("alpha").unwrap();
    assert_eq!(names(&graph, alpha), ["alpha.2", "alpha.1"]);
}

#[test]
fn reset_restores_the_configured_state() {
    init_logger();
    let (collection, scene) = collection();
    let object = child(&scene, "box");
    let configured = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0))
        * Matrix4::from(Quaternion::from_angle_z(Deg(30.0)));
    object.borrow_mut().set_value("transformation", configured);
    feature(&object, "mesh");

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);
    let node = graph.find_by_name("box").unwrap();
    let mesh = graph.feature_of(node, FeatureKind::Mesh);
    let before = graph.node(node).unwrap().transform;

    {
        let moved = graph.node_mut(node).unwrap();
        moved.name = "renamed".to_string();
        moved.transform.position = Vector3::new(-5.0, 0.0, 0.0);
        moved.transform.scale = Vector3::new(2.0, 2.0, 2.0);
    }
    if let Some(Feature::Mesh(m)) = graph.feature_mut(mesh).map(|s| &mut s.feature) {
        m.material.diffuse_color = [1.0, 0.0, 0.0, 1.0];
    }

    let report = {
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        builder.reset_object(node);
        builder.finish()
    };
    assert!(report.is_clean(), "{:?}", report.diagnostics);

    let after = graph.node(node).unwrap();
    assert_eq!(after.name, "box");
    for i in 0..3 {
        approx::assert_relative_eq!(after.transform.position[i], before.position[i], epsilon = 1e-5);
        approx::assert_relative_eq!(after.transform.scale[i], before.scale[i], epsilon = 1e-5);
    }
    approx::assert_relative_eq!(after.transform.rotation.s, before.rotation.s, epsilon = 1e-5);
    approx::assert_relative_eq!(after.transform.rotation.v.z, before.rotation.v.z, epsilon = 1e-5);

    // Same key, same place in the draw order, configured material.
    assert_eq!(graph.opaque(), [mesh]);
    let m = graph.feature(mesh).unwrap().feature.as_mesh().unwrap();
    assert_eq!(m.material.diffuse_color, SceneSettings::default().phong.diffuse_color);
    assert_eq!(m.object_id, 1);
}

#[test]
fn set_primitive_updates_mesh_and_record() {
    init_logger();
    let (collection, scene) = collection();
    let object = child(&scene, "shape");
    let record = feature(&object, "mesh");

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);
    let node = graph.find_by_name("shape").unwrap();
    let key = graph.feature_of(node, FeatureKind::Mesh);
    let shader = graph.feature(key).unwrap().feature.as_mesh().unwrap().shader.clone();

    let sphere = Primitive::Sphere {
        rings: 8,
        segments: 12,
    };
    SceneBuilder::new(&mut ctx, &mut graph)
        .set_primitive(key, sphere)
        .unwrap();

    let mesh = graph.feature(key).unwrap().feature.as_mesh().unwrap();
    assert_eq!(mesh.mesh_key, "primitive:sphere:8x12");
    assert_eq!(mesh.primitive, Some(sphere));
    assert!(mesh.shader.ptr_eq(&shader));

    let primitive = record.borrow().group("primitive").unwrap();
    let primitive = primitive.borrow();
    assert_eq!(primitive.value::<String>("type").as_deref(), Some("sphere"));
    assert_eq!(primitive.value::<u32>("rings"), Some(8));
    assert_eq!(primitive.value::<u32>("segments"), Some(12));

    // Rebuilding from the record gives the same mesh.
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);
    let node = graph.find_by_name("shape").unwrap();
    let key = graph.feature_of(node, FeatureKind::Mesh);
    let rebuilt = graph.feature(key).unwrap().feature.as_mesh().unwrap();
    assert_eq!(rebuilt.mesh_key, "primitive:sphere:8x12");
}

#[test]
fn adding_a_light_rebuilds_shaders_behind_the_same_handles() {
    init_logger();
    let (collection, scene) = collection();
    feature(&child(&scene, "box"), "mesh");

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);
    let node = graph.find_by_name("box").unwrap();
    let key = graph.feature_of(node, FeatureKind::Mesh);
    let shader = graph.feature(key).unwrap().feature.as_mesh().unwrap().shader.clone();
    assert_eq!(shader.borrow().key, "phong-objectId-lights0");

    let lamp = {
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        let root = builder.graph().root();
        let lamp = builder.add_object(root, "lamp");
        builder.add_feature(lamp, FeatureKind::Light).unwrap();
        assert!(builder.report().is_clean());
        lamp
    };

    assert_eq!(ctx.shaders.light_count(), 1);
    assert_eq!(shader.borrow().key, "phong-objectId-lights1");
    assert!(ctx.cache.contains("phong-objectId-lights1"));
    assert!(!ctx.cache.contains("phong-objectId-lights0"));
    assert_eq!(ctx.backend.stats().shader_compiles(), 2);

    let light = graph.feature_of(lamp, FeatureKind::Light);
    SceneBuilder::new(&mut ctx, &mut graph).remove_feature(light);
    assert_eq!(ctx.shaders.light_count(), 0);
    assert_eq!(shader.borrow().key, "phong-objectId-lights0");
    assert!(lamp_record_is_empty(&scene));
}

#[test]
fn freed_shaders_can_be_resolved_again_before_a_light_change() {
    init_logger();
    let (collection, scene) = collection();
    feature(&child(&scene, "box"), "mesh");

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);
    let node = graph.find_by_name("box").unwrap();
    SceneBuilder::new(&mut ctx, &mut graph).remove_object(node);
    ctx.free();
    assert!(!ctx.cache.contains("phong-objectId-lights0"));

    let report = {
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        let root = builder.graph().root();
        let crate_node = builder.add_object(root, "crate");
        builder.add_feature(crate_node, FeatureKind::Mesh).unwrap();
        let lamp = builder.add_object(root, "lamp");
        builder.add_feature(lamp, FeatureKind::Light).unwrap();
        builder.finish()
    };
    assert!(report.is_clean(), "{:?}", report.diagnostics);

    let node = graph.find_by_name("crate").unwrap();
    let key = graph.feature_of(node, FeatureKind::Mesh);
    let shader = &graph.feature(key).unwrap().feature.as_mesh().unwrap().shader;
    assert_eq!(shader.borrow().key, "phong-objectId-lights1");
    assert_eq!(ctx.shaders.known_variants().len(), 1);
    assert_eq!(
        ctx.backend.stats().shaders,
        [
            "phong-objectId-lights0",
            "phong-objectId-lights0",
            "phong-objectId-lights1"
        ]
    );
}

#[test]
fn the_grid_is_drawn_last_with_a_flat_colour() {
    init_logger();
    let (collection, scene) = collection();
    feature(&child(&scene, "box"), "mesh");

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    let grid = {
        let mut builder = SceneBuilder::new(&mut ctx, &mut graph);
        builder.build_collection(&collection);
        builder.create_grid().unwrap()
    };
    let ambient = ctx.settings.grid.ambient;

    let frame = render::collect_draws(&graph, Some(&grid));
    let draws: Vec<_> = frame.draws().collect();
    assert_eq!(draws.len(), 2);
    let last = draws[1];
    assert!(last.feature.is_none());
    assert!(last.shader.borrow().key.starts_with("flat"));
    match last.material {
        DrawMaterial::Flat { color, texture } => {
            assert_eq!(color, [ambient, ambient, ambient, 1.0]);
            assert!(texture.is_none());
        }
        DrawMaterial::Phong(_) => panic!("grid drawn with a lit material"),
    }
}

fn lamp_record_is_empty(scene: &ConfigRef) -> bool {
    scene.borrow().groups("child").iter().any(|c| {
        c.borrow().value::<String>("name").as_deref() == Some("lamp")
            && c.borrow().groups("feature").is_empty()
    })
}

#[test]
fn lights_are_counted_before_shaders_are_compiled() {
    init_logger();
    let (collection, scene) = collection();
    feature(&child(&scene, "box"), "mesh");
    feature(&child(&scene, "sun"), "light")
        .borrow_mut()
        .set_value("kind", String::from("directional"));

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);
    assert_eq!(ctx.backend.stats().shaders, ["phong-objectId-lights1"]);
}

#[test]
fn failed_features_leave_no_record_behind() {
    init_logger();
    let (collection, scene) = collection();
    child(&scene, "label");

    let mut backend = HeadlessBackend::new();
    backend.reject_shader("flat-objectId");
    let mut ctx = Context::new(backend, SceneSettings::default());
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);

    let node = graph.find_by_name("label").unwrap();
    let result = SceneBuilder::new(&mut ctx, &mut graph).add_feature(node, FeatureKind::RectangleShape);
    assert!(matches!(result, Err(BuildError::Shader { .. })));
    let record = graph.node(node).unwrap().config().unwrap().clone();
    assert_eq!(record.borrow().group_count("feature"), 0);
    assert!(graph.node(node).unwrap().features().is_empty());
}

#[test]
fn unknown_records_are_skipped_with_warnings() {
    init_logger();
    let root = asset_dir("external", &[("stone.png", &png(2, 2, [90, 90, 90, 255])[..])]);
    let (collection, scene) = collection();
    {
        let resources = collection.borrow_mut().add_group("external_resources");
        for (kind, path) in [("Texture2D", "stone.png"), ("AudioClip", "step.ogg")] {
            let resource = resources.borrow_mut().add_group("resource");
            resource.borrow_mut().set_value("type", kind.to_string());
            resource.borrow_mut().set_value("path", path.to_string());
        }
    }
    let object = child(&scene, "thing");
    feature(&object, "particle_system");
    feature(&object, "mesh");

    let settings = SceneSettings {
        assets: AssetDefaults { root },
        ..Default::default()
    };
    let mut ctx = Context::new(HeadlessBackend::new(), settings);
    let mut graph = SceneGraph::new();
    let report = build(&mut ctx, &mut graph, &collection);

    assert_eq!(report.warnings().count(), 2);
    assert!(ctx.cache.contains("stone.png"));
    let node = graph.find_by_name("thing").unwrap();
    assert_eq!(graph.node(node).unwrap().features().len(), 1);
}

#[test]
fn blended_meshes_are_drawn_after_opaque_ones() {
    init_logger();
    let (collection, scene) = collection();
    let glass = feature(&child(&scene, "glass"), "mesh");
    glass
        .borrow_mut()
        .add_group("material")
        .borrow_mut()
        .set_value("alpha_mode", String::from("blend"));
    feature(&child(&scene, "wall"), "mesh");

    let mut ctx = Context::headless();
    let mut graph = SceneGraph::new();
    build(&mut ctx, &mut graph, &collection);

    let id = |name: &str| {
        let node = graph.find_by_name(name).unwrap();
        let key = graph.feature_of(node, FeatureKind::Mesh);
        graph.feature(key).unwrap().feature.object_id()
    };
    assert_eq!(graph.transparent().len(), 1);
    assert_eq!(id("wall"), Some(1));
    assert_eq!(id("glass"), Some(2));
}
