// 🔑 Key Normalizer
// Canonical forms for composite ids (CT_CB_ST) and CSV header names.
// Both functions are total: bad shapes pass through, they never fail.

/// Canonicalize a composite id to `NN_NN_NN`.
///
/// `-` separators become `_`; three groups of 1-2 digits are zero-padded.
/// Anything else is returned trimmed (with `-` replaced) so legacy free-form
/// identifiers still compare equal to themselves.
///
/// # Examples:
/// ```
/// use trackerid::normalize_composite_id;
/// assert_eq!(normalize_composite_id("1-2-3"), "01_02_03");
/// assert_eq!(normalize_composite_id(" 01_02_03 "), "01_02_03");
/// assert_eq!(normalize_composite_id("CT-A"), "CT_A");
/// ```
pub fn normalize_composite_id(input: &str) -> String {
    let t = input.trim().replace('-', "_");
    if t.is_empty() {
        return String::new();
    }

    let groups: Vec<&str> = t.split('_').collect();
    let well_formed = groups.len() == 3
        && groups
            .iter()
            .all(|g| (1..=2).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()));

    if !well_formed {
        return t;
    }

    format!("{:0>2}_{:0>2}_{:0>2}", groups[0], groups[1], groups[2])
}

/// Canonicalize a header cell: trim, lowercase, whitespace runs → `_`,
/// parentheses removed.
///
/// `"ControlBox ID"` → `"controlbox_id"`, `" Canal (CH) "` → `"canal_ch"`.
pub fn normalize_header_name(input: &str) -> String {
    let lowered = input.trim().to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut in_space = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
                in_space = true;
            }
            continue;
        }
        in_space = false;
        if ch == '(' || ch == ')' {
            continue;
        }
        out.push(ch);
    }
    out
}

// ============================================================================
// DISPLAY LABELS
// ============================================================================

/// Left-pad the decimal form of `n` with zeros to width 2
pub fn pad2(n: i64) -> String {
    format!("{:0>2}", n.to_string())
}

/// Left-pad the decimal form of `n` with zeros to width 3
pub fn pad3(n: i64) -> String {
    format!("{:0>3}", n.to_string())
}

/// `TK141`, `TK007`
pub fn tk_label(tk: i64) -> String {
    format!("TK{}", pad3(tk))
}

/// `P3-ID04`
pub fn controlbox_label(platform: i64, controlbox_id: i64) -> String {
    format!("P{}-ID{}", platform, pad2(controlbox_id))
}
