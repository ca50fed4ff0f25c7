//! Attendance statistics, guest search and display helpers.

use crate::model::Attendee;
use serde::{Deserialize, Serialize};

/// Attendance figures for one party.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeStats {
    /// Registered invitations
    pub total: usize,
    /// Invitations already redeemed
    pub scanned: usize,
    /// Invitations not yet redeemed
    pub not_scanned: usize,
    /// Rounded share of redeemed invitations, 0 when there are none
    pub percentage: u8,
}

impl AttendeeStats {
    /// Compute figures from an attendee list.
    ///
    /// # Examples
    ///
    /// ```
    /// use guestpass_core::insights::AttendeeStats;
    ///
    /// let stats = AttendeeStats::from_counts(3, 2);
    /// assert_eq!(stats.not_scanned, 1);
    /// assert_eq!(stats.percentage, 67);
    /// assert_eq!(AttendeeStats::from_counts(0, 0).percentage, 0);
    /// ```
    #[must_use]
    pub fn from_attendees(attendees: &[Attendee]) -> Self {
        let scanned = attendees.iter().filter(|a| a.scanned).count();
        Self::from_counts(attendees.len(), scanned)
    }

    /// Compute figures from raw counts; `scanned` is capped at `total`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // bounded to 0..=100
    pub fn from_counts(total: usize, scanned: usize) -> Self {
        let scanned = scanned.min(total);
        let percentage = if total == 0 {
            0
        } else {
            ((scanned * 200 + total) / (total * 2)) as u8
        };
        Self {
            total,
            scanned,
            not_scanned: total - scanned,
            percentage,
        }
    }
}

/// Case-insensitive search over name, phone and code.
///
/// An empty (or blank) search returns every attendee.
#[must_use]
pub fn filter_attendees<'a>(attendees: &'a [Attendee], search: &str) -> Vec<&'a Attendee> {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return attendees.iter().collect();
    }
    attendees
        .iter()
        .filter(|a| {
            a.name.to_lowercase().contains(&needle)
                || a.phone.contains(&needle)
                || a.code.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Group a ten-digit phone number as `XX XX XX XX XX`.
///
/// Other inputs are returned unchanged.
///
/// # Examples
///
/// ```
/// use guestpass_core::insights::format_phone;
///
/// assert_eq!(format_phone("06.12.34.56.78"), "06 12 34 56 78");
/// assert_eq!(format_phone("+33 6 12 34 56 78"), "+33 6 12 34 56 78");
/// assert_eq!(format_phone(""), "");
/// ```
#[must_use]
pub fn format_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 10 {
        return phone.to_string();
    }
    digits
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Link a guest can open to find a party by join code.
#[must_use]
pub fn party_share_link(base_url: &str, join_code: &str) -> String {
    format!("{}/party?code={join_code}", base_url.trim_end_matches('/'))
}
