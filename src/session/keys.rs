//! Key specifier parsing for `Input.dispatchKeyEvent`.

pub const MOD_ALT: u32 = 1;
pub const MOD_CTRL: u32 = 2;
pub const MOD_META: u32 = 4;
pub const MOD_SHIFT: u32 = 8;

/// A single key press with its modifiers, ready to be sent as keyDown/char/keyUp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    pub modifiers: u32,
    /// Text produced by the press; `None` for control keys and shortcuts.
    pub text: Option<String>,
}

/// Parse `"Enter"`, `"Ctrl+A"`, `"Shift+Tab"`, ... into a chord.
/// Returns `None` for an empty or modifier-only specifier.
pub fn parse_key_chord(chord: &str) -> Option<KeyChord> {
    let chord = chord.trim();
    if chord.is_empty() {
        return None;
    }

    // "Ctrl++" means the plus key itself.
    let (mod_part, base) = match chord.strip_suffix("++") {
        Some(rest) => (rest, "+"),
        None => match chord.rsplit_once('+') {
            Some((mods, base)) => (mods, base),
            None => ("", chord),
        },
    };
    let base = base.trim();
    if base.is_empty() {
        return None;
    }

    let mut modifiers = 0;
    for m in mod_part.split('+').map(str::trim).filter(|m| !m.is_empty()) {
        modifiers |= match m.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => MOD_CTRL,
            "alt" | "option" => MOD_ALT,
            "shift" => MOD_SHIFT,
            "meta" | "cmd" | "command" | "super" => MOD_META,
            other => {
                tracing::debug!(modifier = other, "ignoring unknown key modifier");
                0
            }
        };
    }

    let key = canonical_key_name(base);
    let key_code = virtual_key_code(&key);
    let code = dom_code(&key);

    let printable = key.chars().count() == 1 && modifiers & (MOD_CTRL | MOD_ALT | MOD_META) == 0;
    let text = if printable {
        Some(if modifiers & MOD_SHIFT != 0 {
            key.to_uppercase()
        } else {
            key.clone()
        })
    } else if key == "Enter" && modifiers == 0 {
        Some("\r".to_string())
    } else {
        None
    };

    Some(KeyChord {
        key,
        code,
        key_code,
        modifiers,
        text,
    })
}

/// Chord for typing one character of free text.
pub fn char_chord(ch: char) -> KeyChord {
    let key = ch.to_string();
    match ch {
        '\n' => KeyChord {
            key: "Enter".into(),
            code: "Enter".into(),
            key_code: 13,
            modifiers: 0,
            text: Some("\r".into()),
        },
        '\t' => KeyChord {
            key: "Tab".into(),
            code: "Tab".into(),
            key_code: 9,
            modifiers: 0,
            text: None,
        },
        _ => KeyChord {
            code: dom_code(&key),
            key_code: virtual_key_code(&key),
            modifiers: 0,
            text: Some(key.clone()),
            key,
        },
    }
}

fn canonical_key_name(base: &str) -> String {
    let named = match base.to_ascii_lowercase().as_str() {
        "enter" | "return" => "Enter",
        "tab" => "Tab",
        "esc" | "escape" => "Escape",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "space" => " ",
        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        _ => "",
    };
    if !named.is_empty() {
        return named.to_string();
    }
    if let Some(n) = function_key_number(base) {
        return format!("F{n}");
    }
    base.to_string()
}

fn function_key_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('F').or_else(|| name.strip_prefix('f'))?;
    let n: u32 = digits.parse().ok()?;
    (1..=12).contains(&n).then_some(n)
}

fn virtual_key_code(key: &str) -> u32 {
    match key {
        "Enter" => 13,
        "Tab" => 9,
        "Escape" => 27,
        "Backspace" => 8,
        "Delete" => 46,
        " " => 32,
        "ArrowUp" => 38,
        "ArrowDown" => 40,
        "ArrowLeft" => 37,
        "ArrowRight" => 39,
        "Home" => 36,
        "End" => 35,
        "PageUp" => 33,
        "PageDown" => 34,
        other => {
            if let Some(n) = function_key_number(other) {
                return 111 + n;
            }
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => c.to_ascii_uppercase() as u32,
                (Some(c), None) => c as u32,
                _ => 0,
            }
        }
    }
}

fn dom_code(key: &str) -> String {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(' '), None) => "Space".to_string(),
        (Some(c), None) if c.is_ascii_alphabetic() => format!("Key{}", c.to_ascii_uppercase()),
        (Some(c), None) if c.is_ascii_digit() => format!("Digit{c}"),
        _ => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_named_key() {
        let chord = parse_key_chord("Enter").unwrap();
        assert_eq!(chord.key, "Enter");
        assert_eq!(chord.key_code, 13);
        assert_eq!(chord.modifiers, 0);
        assert_eq!(chord.text.as_deref(), Some("\r"));
    }

    #[test]
    fn modifier_combo_has_no_text() {
        let chord = parse_key_chord("Ctrl+a").unwrap();
        assert_eq!(chord.key, "a");
        assert_eq!(chord.code, "KeyA");
        assert_eq!(chord.key_code, 65);
        assert_eq!(chord.modifiers, MOD_CTRL);
        assert!(chord.text.is_none());
    }

    #[test]
    fn shift_enter_and_aliases() {
        let chord = parse_key_chord("shift+return").unwrap();
        assert_eq!(chord.key, "Enter");
        assert_eq!(chord.modifiers, MOD_SHIFT);
        assert!(chord.text.is_none());

        assert_eq!(parse_key_chord("esc").unwrap().key, "Escape");
        assert_eq!(parse_key_chord("F5").unwrap().key_code, 116);
    }

    #[test]
    fn plus_key_itself() {
        let chord = parse_key_chord("Ctrl++").unwrap();
        assert_eq!(chord.key, "+");
        assert_eq!(chord.modifiers, MOD_CTRL);
    }

    #[test]
    fn empty_specifier_is_rejected() {
        assert!(parse_key_chord("").is_none());
        assert!(parse_key_chord("   ").is_none());
        assert!(parse_key_chord("Ctrl+").is_none());
    }

    #[test]
    fn char_chord_for_text() {
        let chord = char_chord('7');
        assert_eq!(chord.code, "Digit7");
        assert_eq!(chord.text.as_deref(), Some("7"));
        assert_eq!(char_chord('\n').key, "Enter");
    }
}
