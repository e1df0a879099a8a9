//! Deciding whether two castle records describe the same place, and
//! folding two such records into one.

use castlefinder_shared::{Castle, CastleFinderError, Contact, Result, VisitingInfo};

/// Whether `a` and `b` probably describe the same castle.
///
/// Countries must be equal and both names non-empty. The filtered names,
/// states, cities and districts must then each be contained in one another,
/// compared lowercase with diacritics kept. An empty field is contained in
/// anything, so a missing value never blocks a match. Foundation period is
/// not compared.
pub fn is_probably(a: &Castle, b: &Castle) -> bool {
    if a.country != b.country {
        return false;
    }
    if a.name.trim().is_empty() || b.name.trim().is_empty() {
        return false;
    }

    let either_contains = |x: &str, y: &str| {
        let (x, y) = (x.to_lowercase(), y.to_lowercase());
        x.contains(&y) || y.contains(&x)
    };

    // District checks the other record's value inside this one first.
    let district_matches = {
        let (mine, theirs) = (a.district.to_lowercase(), b.district.to_lowercase());
        mine.contains(&theirs) || theirs.contains(&mine)
    };

    either_contains(&a.filtered_name(), &b.filtered_name())
        && either_contains(&a.state, &b.state)
        && either_contains(&a.city, &b.city)
        && district_matches
}

/// Merge `secondary` into `primary`, returning a new record.
///
/// Fails with [`CastleFinderError::NotReconcilable`] when the two do not
/// satisfy [`is_probably`]. Neither input is modified.
///
/// Field rules, applied against the running result:
/// - name: the shorter one, ties keep primary
/// - free-text fields: fill if empty, otherwise the longer one
/// - contact: fill if absent, otherwise longer phone and longer email
/// - visiting info: fill if absent, otherwise longer hours and facilities
///   present on both sides only
/// - condition: the higher comparison weight
/// - sources: ordered union
pub fn reconcile(primary: &Castle, secondary: &Castle) -> Result<Castle> {
    if !is_probably(primary, secondary) {
        return Err(CastleFinderError::NotReconcilable {
            primary: primary.string_id(),
            secondary: secondary.string_id(),
        });
    }

    let mut merged = primary.clone();

    if secondary.name.chars().count() < merged.name.chars().count() {
        merged.name = secondary.name.clone();
    }

    merged.state = more_informative(&merged.state, &secondary.state);
    merged.city = more_informative(&merged.city, &secondary.city);
    merged.district = more_informative(&merged.district, &secondary.district);
    merged.foundation_period =
        more_informative(&merged.foundation_period, &secondary.foundation_period);
    merged.coordinates = more_informative(&merged.coordinates, &secondary.coordinates);
    merged.picture_url = more_informative(&merged.picture_url, &secondary.picture_url);

    merged.contact = match (merged.contact.take(), &secondary.contact) {
        (None, theirs) => theirs.clone(),
        (Some(mine), None) => Some(mine),
        (Some(mine), Some(theirs)) => Some(Contact {
            phone: more_informative(&mine.phone, &theirs.phone),
            email: more_informative(&mine.email, &theirs.email),
        }),
    };

    merged.visiting_info = match (merged.visiting_info.take(), &secondary.visiting_info) {
        (None, theirs) => theirs.clone(),
        (Some(mine), None) => Some(mine),
        (Some(mine), Some(theirs)) => Some(VisitingInfo {
            working_hours: more_informative(&mine.working_hours, &theirs.working_hours),
            facilities: mine.facilities.intersect(&theirs.facilities),
        }),
    };

    if secondary.property_condition.comparison_weight()
        > merged.property_condition.comparison_weight()
    {
        merged.property_condition = secondary.property_condition;
    }

    for source in &secondary.sources {
        merged.add_source(source.as_str());
    }

    Ok(merged)
}

/// `current` unless it is empty or `other` is strictly longer.
fn more_informative(current: &str, other: &str) -> String {
    if current.is_empty() || other.chars().count() > current.chars().count() {
        other.to_string()
    } else {
        current.to_string()
    }
}
