//! Running scripts against a scene.
//!
//! Scripts are opaque here: the [`ScriptRuntime`] that executes them lives
//! outside this crate. A [`Simulation`] hands it the scene's script features
//! when it starts, forwards frame updates while it runs, and when it stops
//! unloads the scripts and resets every node to its configuration so edits
//! made while running are discarded.
//!
//! # Lifecycle
//!
//! 1. `start()` calls [`ScriptRuntime::on_start`] with every attached script
//! 2. `update()` calls [`ScriptRuntime::on_update`] every frame
//! 3. `stop()` calls [`ScriptRuntime::on_stop`] and resets the graph
//!

use std::time::Duration;

use crate::{
    builder::{BuildReport, SceneBuilder},
    context::Context,
    data_structures::{
        feature::ScriptFeature,
        scene_graph::{FeatureKey, NodeKey, SceneGraph},
    },
};

/// A script feature as handed to the runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptInstance {
    pub feature: FeatureKey,
    pub node: NodeKey,
    pub script: ScriptFeature,
}

pub trait ScriptRuntime {
    /// Load and instantiate the scripts. An error leaves the simulation stopped.
    fn on_start(&mut self, scripts: &[ScriptInstance]) -> anyhow::Result<()>;

    /// Advance every script by `dt`. Scripts may move nodes.
    fn on_update(&mut self, graph: &mut SceneGraph, dt: Duration);

    /// Drop every script instance.
    fn on_stop(&mut self);
}

#[derive(Debug, Default)]
pub struct Simulation {
    running: bool,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start running the graph's scripts. Does nothing if already running.
    pub fn start(&mut self, graph: &SceneGraph, runtime: &mut dyn ScriptRuntime) -> anyhow::Result<()> {
        if self.running {
            return Ok(());
        }
        let scripts: Vec<ScriptInstance> = graph
            .scripts()
            .iter()
            .filter_map(|&key| {
                let slot = graph.feature(key)?;
                Some(ScriptInstance {
                    feature: key,
                    node: slot.node,
                    script: slot.feature.as_script()?.clone(),
                })
            })
            .collect();
        runtime.on_start(&scripts)?;
        log::info!("simulation started with {} scripts", scripts.len());
        self.running = true;
        Ok(())
    }

    pub fn update(&mut self, graph: &mut SceneGraph, runtime: &mut dyn ScriptRuntime, dt: Duration) {
        if self.running {
            runtime.on_update(graph, dt);
        }
    }

    /// Stop the scripts and reset the whole graph to its configuration.
    ///
    /// Returns `None` if the simulation wasn't running.
    pub fn stop(
        &mut self,
        ctx: &mut Context,
        graph: &mut SceneGraph,
        runtime: &mut dyn ScriptRuntime,
    ) -> Option<BuildReport> {
        if !std::mem::take(&mut self.running) {
            return None;
        }
        runtime.on_stop();
        let root = graph.root();
        let mut builder = SceneBuilder::new(ctx, graph);
        builder.reset_tree(root);
        log::info!("simulation stopped");
        Some(builder.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FailingRuntime {
        stopped: bool,
    }

    impl ScriptRuntime for FailingRuntime {
        fn on_start(&mut self, _scripts: &[ScriptInstance]) -> anyhow::Result<()> {
            anyhow::bail!("interpreter missing")
        }

        fn on_update(&mut self, _graph: &mut SceneGraph, _dt: Duration) {
            panic!("updated a stopped simulation");
        }

        fn on_stop(&mut self) {
            self.stopped = true;
        }
    }

    #[test]
    fn failed_start_leaves_the_simulation_stopped() {
        let mut ctx = Context::headless();
        let mut graph = SceneGraph::new();
        let mut runtime = FailingRuntime::default();
        let mut simulation = Simulation::new();

        assert!(simulation.start(&graph, &mut runtime).is_err());
        assert!(!simulation.is_running());
        simulation.update(&mut graph, &mut runtime, Duration::from_millis(16));
        assert!(simulation.stop(&mut ctx, &mut graph, &mut runtime).is_none());
        assert!(!runtime.stopped);
    }
}
