//! Compact range encoding for completed phase sets (`"1-3,5"`).

/// Number of ordered phases every job goes through.
pub const TOTAL_PHASES: u32 = 11;

/// Decode a range string into a sorted, de-duplicated phase list.
///
/// Returns `None` if any token is not a number or an ascending `a-b` range.
pub fn parse_ranges(s: &str) -> Option<Vec<u32>> {
    let mut phases = Vec::new();
    for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().ok()?;
                let hi: u32 = hi.trim().parse().ok()?;
                if lo > hi {
                    return None;
                }
                phases.extend(lo..=hi);
            }
            None => phases.push(token.parse().ok()?),
        }
    }
    phases.sort_unstable();
    phases.dedup();
    Some(phases)
}

/// Encode phases as collapsed ranges. Input need not be sorted.
pub fn encode_ranges(phases: &[u32]) -> String {
    let mut sorted = phases.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for p in iter {
        if p == end + 1 {
            end = p;
            continue;
        }
        parts.push(span(start, end));
        start = p;
        end = p;
    }
    parts.push(span(start, end));
    parts.join(",")
}

/// Range string for "every phase up to and including `n`".
pub fn through(n: u32) -> String {
    match n {
        0 => String::new(),
        1 => "1".to_string(),
        n => format!("1-{}", n),
    }
}

fn span(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}
