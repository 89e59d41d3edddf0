//! Small macros shared across the daemon

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(display.apply_profile("lobby"), "apply profile");
/// ```
#[macro_export]
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        if let Err(e) = $expr {
            log::error!("Failed to {}: {}", $context, e);
        }
    };
}

/// Check a string setting against its allowed values.
///
/// Evaluates to `anyhow::Result<()>`, so it can end a function or be
/// followed by `?`.
///
/// # Example
/// ```ignore
/// validate_enum!(decoder, "auto", "ffmpeg", "gstreamer")?;
/// validate_enum!(scale, "center", "fill", "fit", "stretch", "tile")
/// ```
#[macro_export]
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+ $(,)?) => {{
        let value: &str = $value;
        let allowed: &[&str] = &[$($variant),+];
        if allowed.contains(&value) {
            Ok::<(), anyhow::Error>(())
        } else {
            Err(anyhow::anyhow!(
                "Invalid value: {} (expected one of: {})",
                value,
                allowed.join(", ")
            ))
        }
    }};
}
