//! Logical key names → monitor channel key syntax.

/// Map a logical navigation key to the hypervisor's native `sendkey`
/// name. Unmapped strings are forwarded verbatim.
#[must_use]
pub fn map_logical_key(key: &str) -> &str {
    match key.to_ascii_uppercase().as_str() {
        "UP" => "up",
        "DOWN" => "down",
        "LEFT" => "left",
        "RIGHT" => "right",
        "ENTER" => "ret",
        "BACK" => "esc",
        "HOME" => "home",
        // The Android-x86 images bind the menu action to F2.
        "MENU" => "f2",
        _ => key,
    }
}
