use chrono::Datelike;
use chrono_tz::Tz;

use crate::model::*;

/// Find the weekly rule covering `window`, read in the availability zone.
///
/// First match in list order wins. A rule matches when its weekday is the local
/// start's weekday, the local start is not before the rule start and the local end
/// is not after the rule end. Rules never span days, so a window whose local end
/// falls on a later date than its local start never matches.
pub fn resolve_rule<'a>(
    rules: &'a [AvailabilitySlot],
    window: &Span,
    tz: Tz,
) -> Option<&'a AvailabilitySlot> {
    let local_start = to_utc(window.start)?.with_timezone(&tz);
    let local_end = to_utc(window.end)?.with_timezone(&tz);
    if local_end.date_naive() != local_start.date_naive() {
        return None;
    }

    let day = local_start.weekday();
    let (start, end) = (local_start.time(), local_end.time());
    rules
        .iter()
        .find(|r| r.day_of_week == day && start >= r.start_local && end <= r.end_local)
}
