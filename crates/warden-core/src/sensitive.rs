//! Digit-level detection of sensitive numbers in free text.
//!
//! Used by the risk classifier to block browser steps whose typed value is a
//! payment card number or a social security number, even when no field label
//! gives it away.

/// Luhn checksum validation for 13-19 digit sequences.
fn luhn_check(digits: &[u32]) -> bool {
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Whether `text` contains a Luhn-valid card number.
///
/// Digits may be grouped with single spaces or dashes. Any whole groups
/// inside a run can form the number, so digits typed before or after the
/// card (an expiry, a CVV) do not hide it.
pub fn contains_card_number(text: &str) -> bool {
    digit_runs(text).iter().any(|groups| {
        (0..groups.len()).any(|start| {
            let mut digits: Vec<u32> = Vec::new();
            for group in &groups[start..] {
                digits.extend(group);
                if digits.len() > 19 {
                    return false;
                }
                if luhn_check(&digits) {
                    return true;
                }
            }
            false
        })
    })
}

/// Split `text` into runs of digit groups. Groups within a run are joined by
/// exactly one space or dash; anything else ends the run.
fn digit_runs(text: &str) -> Vec<Vec<Vec<u32>>> {
    let mut runs = Vec::new();
    let mut groups: Vec<Vec<u32>> = Vec::new();
    let mut current: Vec<u32> = Vec::new();

    for c in text.chars() {
        match c.to_digit(10) {
            Some(d) => current.push(d),
            None if (c == ' ' || c == '-') && !current.is_empty() => {
                groups.push(std::mem::take(&mut current));
            }
            None => {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                if !groups.is_empty() {
                    runs.push(std::mem::take(&mut groups));
                }
            }
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    if !groups.is_empty() {
        runs.push(groups);
    }
    runs
}

/// Whether `text` contains an SSN-shaped token (`ddd-dd-dddd`).
pub fn contains_ssn(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    (0..chars.len()).any(|pos| is_ssn_at(&chars, pos))
}

fn is_ssn_at(chars: &[char], pos: usize) -> bool {
    if pos + 11 > chars.len() {
        return false;
    }
    // Reject matches embedded in a longer digit run.
    if pos > 0 && chars[pos - 1].is_ascii_digit() {
        return false;
    }
    if chars.get(pos + 11).is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    let shape = "ddd-dd-dddd";
    shape.chars().enumerate().all(|(offset, kind)| {
        let c = chars[pos + offset];
        match kind {
            'd' => c.is_ascii_digit(),
            _ => c == '-',
        }
    })
}

/// Whether `text` contains any number the engine refuses to type.
pub fn contains_sensitive_number(text: &str) -> bool {
    contains_card_number(text) || contains_ssn(text)
}
