use std::collections::BTreeSet;

/// Smallest non-negative slot not in `used`, or `None` if it would reach `cap`.
/// Freed slots are reused before new ones are opened; nothing is compacted.
pub fn lowest_free_slot(used: impl IntoIterator<Item = u32>, cap: Option<u32>) -> Option<u32> {
    let taken: BTreeSet<u32> = used.into_iter().collect();

    let mut candidate = 0u32;
    for slot in taken {
        if slot == candidate {
            candidate += 1;
        } else if slot > candidate {
            break;
        }
    }

    match cap {
        Some(cap) if candidate >= cap => None,
        _ => Some(candidate),
    }
}
