#[cfg(feature = "devel")]
pub mod draw;

#[cfg(feature = "editor")]
use bevy::{app::PluginGroupBuilder, prelude::PluginGroup};

#[cfg(feature = "editor")]
#[derive(Debug)]
/// Development plugins intended for debug builds use.
pub struct DeveloperPlugins;

#[cfg(feature = "editor")]
impl PluginGroup for DeveloperPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::start::<Self>()
            .add(bevy_editor_pls::prelude::EditorPlugin)
            .add(bevy_inspector_egui_rapier::InspectableRapierPlugin)
    }
}
