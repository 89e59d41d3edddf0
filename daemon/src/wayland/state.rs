use smithay_client_toolkit::{
    compositor::CompositorState, output::OutputState, registry::RegistryState,
    shell::wlr_layer::{LayerShell, LayerSurface}, shm::Shm,
};
use wayland_client::protocol::wl_output;

use crate::buffer::ShmBuffer;

/// Most buffers a screen keeps while the compositor holds the others
pub(super) const MAX_BUFFERS: usize = 2;

pub struct WaylandState {
    pub(super) registry_state: RegistryState,
    pub(super) compositor_state: CompositorState,
    pub(super) layer_shell: LayerShell,
    pub(super) output_state: OutputState,
    pub(super) shm: Shm,
    pub(super) layers: Vec<ScreenLayer>,
}

/// The layer surface mirroring one screen
pub struct ScreenLayer {
    pub(super) screen: String,
    pub(super) output: wl_output::WlOutput,
    pub(super) layer: LayerSurface,
    pub(super) fullscreen: bool,
    pub(super) configured: bool,
    /// Set by a configure; the next present repaints even without damage
    pub(super) dirty: bool,
    pub(super) buffers: Vec<ShmBuffer>,
}

impl WaylandState {
    pub(super) fn layer_mut(&mut self, screen: &str) -> Option<&mut ScreenLayer> {
        self.layers.iter_mut().find(|l| l.screen == screen)
    }

    pub(super) fn drop_layer(&mut self, screen: &str) {
        let before = self.layers.len();
        self.layers.retain(|l| l.screen != screen);
        if self.layers.len() != before {
            log::debug!("Removed layer surface for {}", screen);
        }
    }
}
