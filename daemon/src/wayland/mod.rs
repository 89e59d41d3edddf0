//! Compositor presentation
//!
//! Screens are discovered from the compositor's outputs. Each open
//! [`ScreenSurface`] is mirrored onto a wlr layer surface on its output:
//! the `top` layer while windowed, `overlay` once fullscreen. Pixels are
//! copied into shared memory buffers only when the surface was damaged.
//!
//! Everything here runs on the display loop thread. Dispatch never blocks.

mod event_handlers;
mod outputs;
mod state;

use anyhow::Result;
use common::ScreenInfo;
use smithay_client_toolkit::{
    compositor::CompositorState, output::OutputState, registry::RegistryState,
    shell::wlr_layer::LayerShell, shm::Shm,
};
use std::io::ErrorKind;
use wayland_client::{
    Connection, EventQueue, QueueHandle, backend::WaylandError, globals::registry_queue_init,
    protocol::wl_output,
};

use crate::surface::ScreenSurface;
use state::WaylandState;

pub struct Compositor {
    event_queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    state: WaylandState,
}

impl Compositor {
    /// Connect through `WAYLAND_DISPLAY` and collect the outputs
    pub fn connect() -> Result<Self> {
        log::info!("Connecting to Wayland compositor...");

        let conn = Connection::connect_to_env()?;
        let (globals, mut event_queue) = registry_queue_init(&conn)?;
        let qh = event_queue.handle();

        let mut state = WaylandState {
            registry_state: RegistryState::new(&globals),
            compositor_state: CompositorState::bind(&globals, &qh)?,
            layer_shell: LayerShell::bind(&globals, &qh)?,
            output_state: OutputState::new(&globals, &qh),
            shm: Shm::bind(&globals, &qh)?,
            layers: Vec::new(),
        };

        // The first roundtrip announces the outputs, the second their details
        event_queue.roundtrip(&mut state)?;
        event_queue.roundtrip(&mut state)?;

        log::info!(
            "Connected to Wayland compositor, {} output(s)",
            state.output_state.outputs().count()
        );

        Ok(Self {
            event_queue,
            qh,
            state,
        })
    }

    /// Screen topology as the compositor reports it
    pub fn screens(&self) -> Vec<ScreenInfo> {
        let mut screens: Vec<ScreenInfo> = self
            .state
            .output_state
            .outputs()
            .enumerate()
            .filter_map(|(index, output)| {
                let info = self.state.output_state.info(&output)?;
                outputs::screen_from_output(index, &info)
            })
            .collect();
        outputs::mark_primary(&mut screens);
        screens
    }

    fn output_named(&self, name: &str) -> Option<wl_output::WlOutput> {
        self.state
            .output_state
            .outputs()
            .enumerate()
            .find(|(index, output)| {
                self.state
                    .output_state
                    .info(output)
                    .is_some_and(|info| outputs::output_name(*index, info.name.as_deref()) == name)
            })
            .map(|(_, output)| output)
    }

    /// Push damaged surfaces to the compositor and handle its events
    pub fn present<'a>(&mut self, surfaces: impl Iterator<Item = &'a mut ScreenSurface>) -> Result<()> {
        for surface in surfaces {
            let output = self.output_named(&surface.info().name);
            outputs::present_surface(&mut self.state, &self.qh, output, surface)?;
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Result<()> {
        self.event_queue.flush()?;
        self.event_queue.dispatch_pending(&mut self.state)?;

        if let Some(guard) = self.event_queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.event_queue.dispatch_pending(&mut self.state)?;
        Ok(())
    }
}
