use anyhow::Result;
use common::ScreenInfo;
use smithay_client_toolkit::{
    output::OutputInfo,
    shell::{
        WaylandSurface,
        wlr_layer::{Anchor, KeyboardInteractivity, Layer},
    },
};
use wayland_client::{QueueHandle, protocol::wl_output};

use super::state::{MAX_BUFFERS, ScreenLayer, WaylandState};
use crate::buffer::ShmBuffer;
use crate::surface::ScreenSurface;

/// Screen geometry of one output. Outputs without a usable size are skipped.
pub(super) fn screen_from_output(index: usize, info: &OutputInfo) -> Option<ScreenInfo> {
    let current_mode = info.modes.iter().find(|m| m.current).map(|m| m.dimensions);
    screen_from_geometry(
        index,
        info.name.as_deref(),
        info.logical_position.unwrap_or(info.location),
        info.logical_size.or(current_mode),
    )
}

fn screen_from_geometry(
    index: usize,
    name: Option<&str>,
    (x, y): (i32, i32),
    size: Option<(i32, i32)>,
) -> Option<ScreenInfo> {
    let (width, height) = size?;
    if width <= 0 || height <= 0 {
        return None;
    }

    Some(ScreenInfo {
        name: output_name(index, name),
        x,
        y,
        width: width as u32,
        height: height as u32,
        primary: false,
    })
}

pub(super) fn output_name(index: usize, name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("output-{}", index),
    }
}

/// The output at the origin is primary, else the first one
pub(super) fn mark_primary(screens: &mut [ScreenInfo]) {
    let primary = screens
        .iter()
        .position(|s| s.x == 0 && s.y == 0)
        .unwrap_or(0);
    if let Some(screen) = screens.get_mut(primary) {
        screen.primary = true;
    }
}

/// Windowed screens stay under fullscreen apps; fullscreen ones cover panels
pub(super) fn layer_for(fullscreen: bool) -> Layer {
    if fullscreen { Layer::Overlay } else { Layer::Top }
}

fn create_layer(
    state: &mut WaylandState,
    qh: &QueueHandle<WaylandState>,
    output: wl_output::WlOutput,
    info: &ScreenInfo,
    fullscreen: bool,
) {
    let surface = state.compositor_state.create_surface(qh);
    let layer = state.layer_shell.create_layer_surface(
        qh,
        surface,
        layer_for(fullscreen),
        Some("marquee"),
        Some(&output),
    );

    layer.set_anchor(Anchor::all());
    layer.set_size(info.width, info.height);
    layer.set_exclusive_zone(-1);
    layer.set_keyboard_interactivity(KeyboardInteractivity::None);
    layer.commit();

    state.layers.push(ScreenLayer {
        screen: info.name.clone(),
        output,
        layer,
        fullscreen,
        configured: false,
        dirty: false,
        buffers: Vec::new(),
    });

    log::info!(
        "Created {} layer surface for {}",
        if fullscreen { "fullscreen" } else { "windowed" },
        info.name
    );
}

/// Mirror one screen surface onto its layer surface
pub(super) fn present_surface(
    state: &mut WaylandState,
    qh: &QueueHandle<WaylandState>,
    output: Option<wl_output::WlOutput>,
    surface: &mut ScreenSurface,
) -> Result<()> {
    let name = surface.info().name.clone();
    if !surface.is_open() {
        state.drop_layer(&name);
        return Ok(());
    }

    let fullscreen = surface.is_fullscreen();
    let stale = state.layer_mut(&name).map(|l| l.fullscreen != fullscreen);
    if stale != Some(false) {
        // Missing, or the layer shell needs a new surface to change layer
        state.drop_layer(&name);
        if let Some(output) = output {
            create_layer(state, qh, output, surface.info(), fullscreen);
            surface.mark_damaged();
        }
        return Ok(());
    }

    let WaylandState { shm, layers, .. } = state;
    let Some(screen_layer) = layers.iter_mut().find(|l| l.screen == name) else {
        return Ok(());
    };
    if !screen_layer.configured || !(screen_layer.dirty || surface.is_damaged()) {
        return Ok(());
    }
    let Some(pixels) = surface.buffer().map(|b| b.pixels()) else {
        return Ok(());
    };

    let (width, height) = (surface.info().width, surface.info().height);
    let Some(buffer) = free_buffer(&mut screen_layer.buffers, shm.wl_shm(), width, height, qh)?
    else {
        // Both buffers still held by the compositor; retry next tick
        return Ok(());
    };

    buffer.write(pixels)?;
    let wl_surface = screen_layer.layer.wl_surface();
    wl_surface.attach(Some(buffer.buffer()), 0, 0);
    wl_surface.damage_buffer(0, 0, width as i32, height as i32);
    wl_surface.commit();
    buffer.mark_busy();

    screen_layer.dirty = false;
    surface.mark_presented();
    Ok(())
}

/// A released buffer of the right size, allocating while under the cap
fn free_buffer<'a>(
    buffers: &'a mut Vec<ShmBuffer>,
    shm: &wayland_client::protocol::wl_shm::WlShm,
    width: u32,
    height: u32,
    qh: &QueueHandle<WaylandState>,
) -> Result<Option<&'a mut ShmBuffer>> {
    buffers.retain(|b| b.width() == width && b.height() == height);

    if let Some(index) = buffers.iter().position(|b| b.is_released()) {
        return Ok(buffers.get_mut(index));
    }
    if buffers.len() >= MAX_BUFFERS {
        return Ok(None);
    }

    buffers.push(ShmBuffer::new(shm, width, height, qh)?);
    Ok(buffers.last_mut())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_geometry_becomes_screen() {
        let screen = screen_from_geometry(1, Some("DP-2"), (1920, 0), Some((2560, 1440))).unwrap();
        assert_eq!(screen.name, "DP-2");
        assert_eq!((screen.x, screen.y), (1920, 0));
        assert_eq!((screen.width, screen.height), (2560, 1440));
        assert!(!screen.primary);
    }

    #[test]
    fn test_unnamed_output_gets_index_name() {
        assert_eq!(output_name(3, None), "output-3");
        assert_eq!(output_name(0, Some("")), "output-0");
        assert_eq!(output_name(0, Some("HDMI-A-1")), "HDMI-A-1");
    }

    #[test]
    fn test_output_without_size_is_skipped() {
        assert!(screen_from_geometry(0, Some("DP-1"), (0, 0), None).is_none());
        assert!(screen_from_geometry(0, Some("DP-1"), (0, 0), Some((0, 1080))).is_none());
    }

    #[test]
    fn test_primary_is_output_at_origin() {
        let mut screens = vec![
            screen_from_geometry(0, Some("left"), (-1280, 0), Some((1280, 720))).unwrap(),
            screen_from_geometry(1, Some("main"), (0, 0), Some((1920, 1080))).unwrap(),
        ];
        mark_primary(&mut screens);
        assert!(!screens[0].primary);
        assert!(screens[1].primary);

        let mut offset = vec![
            screen_from_geometry(0, Some("a"), (100, 0), Some((800, 600))).unwrap(),
            screen_from_geometry(1, Some("b"), (900, 0), Some((800, 600))).unwrap(),
        ];
        mark_primary(&mut offset);
        assert!(offset[0].primary);
        assert!(!offset[1].primary);
    }

    #[test]
    fn test_fullscreen_uses_overlay_layer() {
        assert!(matches!(layer_for(true), Layer::Overlay));
        assert!(matches!(layer_for(false), Layer::Top));
    }
}
