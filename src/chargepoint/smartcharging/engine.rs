//! Composite-schedule and setpoint resolution
//!
//! Pure functions over installed profiles: given a connector's candidate
//! profiles, a point in time and a requested window, they resolve the
//! effective limit per instant and fold it into a single schedule.
//!
//! Resolution rules:
//! - a profile is active at `t` when its anchored schedule covers `t`
//!   (Absolute: `start_schedule`; Relative: transaction start, else `now`;
//!   Recurring: the occurrence of `start_schedule` containing `t`);
//! - among active profiles of one purpose the highest stack level wins,
//!   ties broken by most recent installation;
//! - the connector limit is the TxProfile track, falling back to
//!   TxDefaultProfile; the final limit is the minimum of the connector
//!   limit and the charge-point-wide limit after unit conversion with
//!   `operating_voltage * number_phases` (3 phases when unspecified).

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use super::profiles::InstalledProfile;
use crate::types::{
    ChargingProfile, ChargingProfileKind, ChargingRateUnit, ChargingSchedule,
    ChargingSchedulePeriod, RecurrencyKind,
};

const DAY_SECONDS: i64 = 86_400;
const WEEK_SECONDS: i64 = 7 * DAY_SECONDS;

/// Instantaneous charging limit resolved for one connector.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartChargingSetpoint {
    /// Limit in the requested rate unit.
    pub value: f64,
    /// Number of phases, 3 when the profile does not constrain them.
    pub number_phases: u32,
    /// Floor suggested to the EV, in the requested rate unit.
    pub min_charging_rate: Option<f64>,
}

/// Evaluation context for one query.
#[derive(Debug, Clone)]
pub struct ScheduleContext {
    pub now: DateTime<Utc>,
    /// Requested window in seconds.
    pub window: i64,
    pub unit: ChargingRateUnit,
    pub operating_voltage: f64,
    /// Start of the active transaction on the queried connector, anchoring
    /// Relative profiles.
    pub transaction_start: Option<DateTime<Utc>>,
}

/// Limit taken from one profile at one instant, still in the profile's
/// own rate unit.
#[derive(Debug, Clone, PartialEq)]
struct LimitPoint {
    limit: f64,
    unit: ChargingRateUnit,
    number_phases: Option<u32>,
    min_charging_rate: Option<f64>,
}

/// Limit converted to the requested unit.
#[derive(Debug, Clone, PartialEq)]
struct MergedPoint {
    limit: f64,
    number_phases: Option<u32>,
    min_charging_rate: Option<f64>,
}

fn is_valid_at(profile: &ChargingProfile, now: DateTime<Utc>) -> bool {
    profile.valid_from.map_or(true, |from| from <= now)
        && profile.valid_to.map_or(true, |to| to >= now)
}

fn recurrency_period(profile: &ChargingProfile) -> i64 {
    match profile.recurrency_kind {
        Some(RecurrencyKind::Weekly) => WEEK_SECONDS,
        _ => DAY_SECONDS,
    }
}

/// Anchor and effective duration of the schedule occurrence covering `at`.
fn occurrence_at(
    profile: &ChargingProfile,
    now: DateTime<Utc>,
    transaction_start: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> Option<(DateTime<Utc>, Option<i64>)> {
    let schedule = &profile.charging_schedule;
    match profile.charging_profile_kind {
        ChargingProfileKind::Absolute => Some((
            schedule.start_schedule.unwrap_or(now),
            schedule.duration.map(i64::from),
        )),
        ChargingProfileKind::Relative => Some((
            transaction_start.unwrap_or(now),
            schedule.duration.map(i64::from),
        )),
        ChargingProfileKind::Recurring => {
            let base = schedule.start_schedule.unwrap_or(now);
            if at < base {
                return None;
            }
            let period = recurrency_period(profile);
            let k = (at - base).num_seconds() / period;
            let occurrence = base + Duration::seconds(k * period);
            let duration = schedule.duration.map(i64::from).unwrap_or(period).min(period);
            Some((occurrence, Some(duration)))
        }
    }
}

/// Limit of `profile` at instant `at`, `None` when the profile is not
/// active there.
fn limit_at(
    profile: &ChargingProfile,
    now: DateTime<Utc>,
    transaction_start: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> Option<LimitPoint> {
    let (start, duration) = occurrence_at(profile, now, transaction_start, at)?;
    let elapsed = (at - start).num_seconds();
    if elapsed < 0 {
        return None;
    }
    if let Some(duration) = duration {
        if elapsed >= duration {
            return None;
        }
    }
    let schedule = &profile.charging_schedule;
    let period = schedule
        .charging_schedule_period
        .iter()
        .rev()
        .find(|p| i64::from(p.start_period) <= elapsed)?;
    Some(LimitPoint {
        limit: period.limit,
        unit: schedule.charging_rate_unit,
        number_phases: period.number_phases,
        min_charging_rate: schedule.min_charging_rate,
    })
}

/// First active candidate wins; `candidates` are sorted by decreasing
/// stack level, then decreasing installation rank.
fn select_active(
    candidates: &[InstalledProfile],
    ctx: &ScheduleContext,
    transaction_start: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> Option<LimitPoint> {
    candidates
        .iter()
        .filter(|p| is_valid_at(&p.profile, ctx.now))
        .find_map(|p| limit_at(&p.profile, ctx.now, transaction_start, at))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Convert a point to the requested unit using the operating voltage and
/// the point's phase count (3 when unspecified).
fn convert(point: &LimitPoint, ctx: &ScheduleContext) -> MergedPoint {
    let phases = f64::from(point.number_phases.unwrap_or(3));
    let factor = ctx.operating_voltage * phases;
    let scale = |value: f64| match (point.unit, ctx.unit) {
        (ChargingRateUnit::A, ChargingRateUnit::W) => round1(value * factor),
        (ChargingRateUnit::W, ChargingRateUnit::A) => round1(value / factor),
        _ => value,
    };
    MergedPoint {
        limit: scale(point.limit),
        number_phases: point.number_phases,
        min_charging_rate: point.min_charging_rate.map(scale),
    }
}

/// Combine the charge-point-wide limit and the connector limit: minimum
/// after conversion, ties resolved towards the connector side.
fn merge(
    cp: Option<LimitPoint>,
    connector: Option<LimitPoint>,
    ctx: &ScheduleContext,
) -> Option<MergedPoint> {
    match (cp, connector) {
        (None, None) => None,
        (Some(point), None) | (None, Some(point)) => Some(convert(&point, ctx)),
        (Some(cp), Some(connector)) => {
            let cp = convert(&cp, ctx);
            let connector = convert(&connector, ctx);
            Some(if cp.limit < connector.limit { cp } else { connector })
        }
    }
}

/// Offsets (seconds from `now`, within `[0, window)`) where the effective
/// limit of any candidate may change.
fn boundaries(
    groups: [(&[InstalledProfile], Option<DateTime<Utc>>); 3],
    ctx: &ScheduleContext,
) -> BTreeSet<i64> {
    let mut offsets = BTreeSet::new();
    offsets.insert(0);

    let mut add = |at: DateTime<Utc>| {
        let offset = (at - ctx.now).num_seconds();
        if offset > 0 && offset < ctx.window {
            offsets.insert(offset);
        }
    };

    let mut add_occurrence = |schedule: &ChargingSchedule, start: DateTime<Utc>, duration: Option<i64>| {
        add(start);
        for period in &schedule.charging_schedule_period {
            add(start + Duration::seconds(i64::from(period.start_period)));
        }
        if let Some(duration) = duration {
            add(start + Duration::seconds(duration));
        }
    };

    for (candidates, transaction_start) in groups {
        for installed in candidates {
            let profile = &installed.profile;
            if !is_valid_at(profile, ctx.now) {
                continue;
            }
            let schedule = &profile.charging_schedule;
            match profile.charging_profile_kind {
                ChargingProfileKind::Absolute => add_occurrence(
                    schedule,
                    schedule.start_schedule.unwrap_or(ctx.now),
                    schedule.duration.map(i64::from),
                ),
                ChargingProfileKind::Relative => add_occurrence(
                    schedule,
                    transaction_start.unwrap_or(ctx.now),
                    schedule.duration.map(i64::from),
                ),
                ChargingProfileKind::Recurring => {
                    let base = schedule.start_schedule.unwrap_or(ctx.now);
                    let period = recurrency_period(profile);
                    let duration =
                        schedule.duration.map(i64::from).unwrap_or(period).min(period);
                    let first = ((ctx.now - base).num_seconds() / period).max(0);
                    for k in first.. {
                        let occurrence = base + Duration::seconds(k * period);
                        if occurrence >= ctx.now + Duration::seconds(ctx.window) {
                            break;
                        }
                        add_occurrence(schedule, occurrence, Some(duration));
                    }
                }
            }
        }
    }
    offsets
}

/// Build the composite schedule of one connector over the requested
/// window.
///
/// `cp_candidates` are the ChargePointMaxProfile candidates (connector 0),
/// `tx_candidates` the TxProfile candidates of the connector (already
/// restricted to its active transaction) and `default_candidates` the
/// TxDefaultProfile candidates. All three sorted by decreasing stack level
/// then rank.
pub fn composite_schedule(
    cp_candidates: &[InstalledProfile],
    tx_candidates: &[InstalledProfile],
    default_candidates: &[InstalledProfile],
    ctx: &ScheduleContext,
) -> ChargingSchedule {
    let offsets = boundaries(
        [
            (cp_candidates, None),
            (tx_candidates, ctx.transaction_start),
            (default_candidates, ctx.transaction_start),
        ],
        ctx,
    );

    let mut periods: Vec<ChargingSchedulePeriod> = Vec::new();
    let mut last: Option<(f64, Option<u32>)> = None;
    let mut trailing_gap: Option<i64> = None;
    let mut min_charging_rate = None;

    for &offset in &offsets {
        let at = ctx.now + Duration::seconds(offset);
        let cp = select_active(cp_candidates, ctx, None, at);
        let connector = select_active(tx_candidates, ctx, ctx.transaction_start, at)
            .or_else(|| select_active(default_candidates, ctx, ctx.transaction_start, at));

        match merge(cp, connector, ctx) {
            Some(point) => {
                trailing_gap = None;
                if min_charging_rate.is_none() {
                    min_charging_rate = point.min_charging_rate;
                }
                if last != Some((point.limit, point.number_phases)) {
                    last = Some((point.limit, point.number_phases));
                    periods.push(ChargingSchedulePeriod {
                        start_period: offset as i32,
                        limit: point.limit,
                        number_phases: point.number_phases,
                    });
                }
            }
            None => {
                if trailing_gap.is_none() {
                    trailing_gap = Some(offset);
                }
                last = None;
            }
        }
    }

    let duration = if periods.is_empty() {
        ctx.window
    } else {
        trailing_gap.unwrap_or(ctx.window)
    };

    ChargingSchedule {
        duration: Some(duration as i32),
        start_schedule: Some(ctx.now),
        charging_rate_unit: ctx.unit,
        charging_schedule_period: periods,
        min_charging_rate,
    }
}

/// Instantaneous setpoints at `ctx.now`.
///
/// The first element is the charge-point-wide setpoint, present iff a
/// ChargePointMaxProfile is active; the second is the connector setpoint,
/// present iff any purpose applies.
pub fn setpoints(
    cp_candidates: &[InstalledProfile],
    tx_candidates: &[InstalledProfile],
    default_candidates: &[InstalledProfile],
    ctx: &ScheduleContext,
) -> (Option<SmartChargingSetpoint>, Option<SmartChargingSetpoint>) {
    let at = ctx.now;
    let cp = select_active(cp_candidates, ctx, None, at);
    let connector = select_active(tx_candidates, ctx, ctx.transaction_start, at)
        .or_else(|| select_active(default_candidates, ctx, ctx.transaction_start, at));

    let to_setpoint = |point: MergedPoint| SmartChargingSetpoint {
        value: point.limit,
        number_phases: point.number_phases.unwrap_or(3),
        min_charging_rate: point.min_charging_rate,
    };

    let cp_setpoint = cp.clone().map(|point| to_setpoint(convert(&point, ctx)));
    let connector_setpoint = merge(cp, connector, ctx).map(to_setpoint);
    (cp_setpoint, connector_setpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChargingProfilePurpose;

    fn period(start: i32, limit: f64, phases: u32) -> ChargingSchedulePeriod {
        ChargingSchedulePeriod {
            start_period: start,
            limit,
            number_phases: Some(phases),
        }
    }

    struct ProfileSpec {
        id: i32,
        stack: u32,
        purpose: ChargingProfilePurpose,
        kind: ChargingProfileKind,
        start: Option<DateTime<Utc>>,
        duration: Option<i32>,
        min_rate: Option<f64>,
        periods: Vec<ChargingSchedulePeriod>,
    }

    fn installed(rank: i32, connector_id: u32, spec: ProfileSpec) -> InstalledProfile {
        InstalledProfile {
            rank,
            connector_id,
            profile: ChargingProfile {
                charging_profile_id: spec.id,
                transaction_id: None,
                stack_level: spec.stack,
                charging_profile_purpose: spec.purpose,
                charging_profile_kind: spec.kind,
                recurrency_kind: None,
                valid_from: None,
                valid_to: None,
                charging_schedule: ChargingSchedule {
                    duration: spec.duration,
                    start_schedule: spec.start,
                    charging_rate_unit: ChargingRateUnit::A,
                    charging_schedule_period: spec.periods,
                    min_charging_rate: spec.min_rate,
                },
            },
        }
    }

    fn ctx(now: DateTime<Utc>, window: i64) -> ScheduleContext {
        ScheduleContext {
            now,
            window,
            unit: ChargingRateUnit::A,
            operating_voltage: 230.0,
            transaction_start: None,
        }
    }

    fn expect_periods(schedule: &ChargingSchedule, expected: &[(i32, f64, u32)]) {
        let actual: Vec<(i32, f64, u32)> = schedule
            .charging_schedule_period
            .iter()
            .map(|p| (p.start_period, p.limit, p.number_phases.unwrap()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn no_profile_yields_empty_schedule_of_requested_duration() {
        let now = Utc::now();
        let schedule = composite_schedule(&[], &[], &[], &ctx(now, 3600));
        assert_eq!(schedule.duration, Some(3600));
        assert!(schedule.charging_schedule_period.is_empty());
        assert_eq!(schedule.start_schedule, Some(now));
    }

    #[test]
    fn single_relative_profile_fills_the_window() {
        let now = Utc::now();
        let default = installed(
            1,
            1,
            ProfileSpec {
                id: 1,
                stack: 0,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: None,
                periods: vec![period(0, 16.0, 3)],
            },
        );
        let schedule = composite_schedule(&[], &[], &[default], &ctx(now, 7200));
        assert_eq!(schedule.duration, Some(7200));
        expect_periods(&schedule, &[(0, 16.0, 3)]);
    }

    #[test]
    fn profile_duration_truncates_the_schedule() {
        let now = Utc::now();
        let default = installed(
            1,
            1,
            ProfileSpec {
                id: 1,
                stack: 0,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: Some(1200),
                min_rate: None,
                periods: vec![period(0, 16.0, 3)],
            },
        );
        let schedule = composite_schedule(&[], &[], &[default], &ctx(now, 3600));
        assert_eq!(schedule.duration, Some(1200));
        expect_periods(&schedule, &[(0, 16.0, 3)]);
    }

    /// Two overlapping TxDefault profiles plus a charge-point-wide limit:
    /// the stack 5 absolute profile dominates from its start to the end of
    /// its duration, the relative stack 4 profile covers the rest, and the
    /// ChargePointMaxProfile caps every instant.
    #[test]
    fn overlapping_profiles_with_charge_point_limit() {
        let now = Utc::now();
        let cp_max = installed(
            1,
            0,
            ProfileSpec {
                id: 10,
                stack: 4,
                purpose: ChargingProfilePurpose::ChargePointMaxProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: None,
                periods: vec![period(0, 16.0, 2), period(200, 20.0, 3), period(500, 64.0, 3)],
            },
        );
        let absolute = installed(
            2,
            1,
            ProfileSpec {
                id: 1,
                stack: 5,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Absolute,
                start: Some(now + Duration::seconds(300)),
                duration: Some(2000),
                min_rate: None,
                periods: vec![period(0, 16.0, 1), period(1000, 10.0, 2), period(1700, 32.0, 3)],
            },
        );
        let relative = installed(
            3,
            1,
            ProfileSpec {
                id: 2,
                stack: 4,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: None,
                periods: vec![period(0, 8.0, 2), period(200, 20.0, 3), period(500, 18.0, 3)],
            },
        );

        let mut defaults = vec![absolute, relative];
        defaults.sort_by(|a, b| b.profile.stack_level.cmp(&a.profile.stack_level));

        let schedule = composite_schedule(&[cp_max], &[], &defaults, &ctx(now, 3600));

        assert_eq!(schedule.duration, Some(3600));
        assert_eq!(schedule.charging_rate_unit, ChargingRateUnit::A);
        expect_periods(
            &schedule,
            &[
                (0, 8.0, 2),
                (200, 20.0, 3),
                (300, 16.0, 1),
                (1300, 10.0, 2),
                (2000, 32.0, 3),
                (2300, 18.0, 3),
            ],
        );
    }

    /// Without the charge point profile the same layout produces the same
    /// composite (the cap never binds).
    #[test]
    fn overlapping_profiles_without_charge_point_limit() {
        let now = Utc::now();
        let absolute = installed(
            1,
            1,
            ProfileSpec {
                id: 1,
                stack: 5,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Absolute,
                start: Some(now + Duration::seconds(300)),
                duration: Some(2000),
                min_rate: None,
                periods: vec![period(0, 16.0, 1), period(1000, 10.0, 2), period(1700, 32.0, 3)],
            },
        );
        let relative = installed(
            2,
            1,
            ProfileSpec {
                id: 2,
                stack: 4,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: None,
                periods: vec![period(0, 8.0, 2), period(300, 20.0, 3), period(500, 18.0, 3)],
            },
        );
        let schedule =
            composite_schedule(&[], &[], &[absolute, relative], &ctx(now, 3600));
        expect_periods(
            &schedule,
            &[
                (0, 8.0, 2),
                (300, 16.0, 1),
                (1300, 10.0, 2),
                (2000, 32.0, 3),
                (2300, 18.0, 3),
            ],
        );
    }

    /// A lower-stack absolute profile starting inside the window takes
    /// over only when the dominant profile's duration expires.
    #[test]
    fn lower_stack_profile_resumes_after_duration() {
        let now = Utc::now();
        let relative = installed(
            1,
            1,
            ProfileSpec {
                id: 1,
                stack: 5,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: Some(2000),
                min_rate: None,
                periods: vec![period(0, 16.0, 1), period(1000, 10.0, 2), period(1700, 32.0, 3)],
            },
        );
        let absolute = installed(
            2,
            1,
            ProfileSpec {
                id: 2,
                stack: 4,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Absolute,
                start: Some(now + Duration::seconds(1600)),
                duration: None,
                min_rate: None,
                periods: vec![period(0, 8.0, 2), period(200, 20.0, 1), period(500, 18.0, 3)],
            },
        );
        let schedule =
            composite_schedule(&[], &[], &[relative, absolute], &ctx(now, 3600));
        expect_periods(
            &schedule,
            &[
                (0, 16.0, 1),
                (1000, 10.0, 2),
                (1700, 32.0, 3),
                (2000, 20.0, 1),
                (2100, 18.0, 3),
            ],
        );
    }

    #[test]
    fn recurring_daily_profile_restarts_each_day() {
        let now = Utc::now();
        // anchored 25h ago: the occurrence covering `now` started 1h ago
        let base = now - Duration::seconds(DAY_SECONDS + 3600);
        let recurring = installed(
            1,
            1,
            ProfileSpec {
                id: 1,
                stack: 1,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Recurring,
                start: Some(base),
                duration: Some(7200),
                min_rate: None,
                periods: vec![period(0, 10.0, 3), period(3600 + 1800, 6.0, 3)],
            },
        );
        let mut recurring = recurring;
        recurring.profile.recurrency_kind = Some(RecurrencyKind::Daily);

        let schedule = composite_schedule(&[], &[], &[recurring], &ctx(now, 7200));
        // active for another hour (elapsed 3600 of 7200), period switch at
        // elapsed 5400 (offset 1800), inactive from offset 3600
        assert_eq!(schedule.duration, Some(3600));
        expect_periods(&schedule, &[(0, 10.0, 3), (1800, 6.0, 3)]);
    }

    #[test]
    fn unit_conversion_applies_voltage_and_phases() {
        let now = Utc::now();
        let mut profile = installed(
            1,
            1,
            ProfileSpec {
                id: 1,
                stack: 0,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: None,
                periods: vec![period(0, 16.0, 2)],
            },
        );
        profile.profile.charging_schedule.charging_rate_unit = ChargingRateUnit::A;

        let mut watt_ctx = ctx(now, 60);
        watt_ctx.unit = ChargingRateUnit::W;
        let schedule = composite_schedule(&[], &[], &[profile], &watt_ctx);
        // 16 A * 230 V * 2 phases
        expect_periods(&schedule, &[(0, 7360.0, 2)]);
    }

    #[test]
    fn setpoint_prefers_tx_profile_and_caps_with_charge_point_limit() {
        let now = Utc::now();
        let cp_max = installed(
            1,
            0,
            ProfileSpec {
                id: 1,
                stack: 1,
                purpose: ChargingProfilePurpose::ChargePointMaxProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: Some(6.0),
                periods: vec![period(0, 8.0, 1)],
            },
        );
        let default = installed(
            2,
            1,
            ProfileSpec {
                id: 2,
                stack: 2,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: Some(10.0),
                periods: vec![period(0, 13.0, 2)],
            },
        );

        let (cp, connector) = setpoints(&[cp_max.clone()], &[], &[default.clone()], &ctx(now, 60));
        let cp = cp.unwrap();
        assert_eq!(cp.value, 8.0);
        assert_eq!(cp.number_phases, 1);
        assert_eq!(cp.min_charging_rate, Some(6.0));
        // charge point limit binds: 8 A < 13 A
        let connector = connector.unwrap();
        assert_eq!(connector.value, 8.0);
        assert_eq!(connector.number_phases, 1);

        // without the cap the TxDefault profile rules
        let (cp, connector) = setpoints(&[], &[], &[default], &ctx(now, 60));
        assert!(cp.is_none());
        let connector = connector.unwrap();
        assert_eq!(connector.value, 13.0);
        assert_eq!(connector.number_phases, 2);
        assert_eq!(connector.min_charging_rate, Some(10.0));
    }

    #[test]
    fn equal_stack_level_most_recent_installation_wins() {
        let now = Utc::now();
        let older = installed(
            1,
            1,
            ProfileSpec {
                id: 1,
                stack: 3,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: None,
                periods: vec![period(0, 10.0, 3)],
            },
        );
        let newer = installed(
            2,
            1,
            ProfileSpec {
                id: 2,
                stack: 3,
                purpose: ChargingProfilePurpose::TxDefaultProfile,
                kind: ChargingProfileKind::Relative,
                start: None,
                duration: None,
                min_rate: None,
                periods: vec![period(0, 20.0, 3)],
            },
        );
        // sorted by stack desc then rank desc, as ProfileStore::candidates does
        let candidates = vec![newer, older];
        let (_, connector) = setpoints(&[], &[], &candidates, &ctx(now, 60));
        assert_eq!(connector.unwrap().value, 20.0);
    }
}
