use anime_season_lib::parser::{episode_minutes, is_valid_broadcast, parse_broadcast};
use anime_season_lib::reconcile::{reconcile, Schedule, SourceRecord};
use anime_season_lib::schedule::RenderPass;
use anime_season_lib::timezone::{project_from_epoch, project_to_local, SOURCE_ZONE};
use anime_season_lib::weekday::{DayOfWeek, TimeOfDay};
use chrono::{Duration, TimeZone, Utc};
use chrono_tz::{America, Etc, Europe, Tz};
use proptest::prelude::*;

fn monday_noon_utc() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

#[test]
fn test_valid_broadcasts_parse_to_canonical_days() {
    let cases = [
        ("Saturdays at 01:00 (JST)", DayOfWeek::Saturday, "01:00"),
        ("MONDAYS at 23:30 (JST)", DayOfWeek::Monday, "23:30"),
        ("Sundays at 7:05 (JST)", DayOfWeek::Sunday, "07:05"),
    ];
    for (text, day, time) in cases {
        let parsed = parse_broadcast(text).unwrap_or_else(|| panic!("{} should parse", text));
        assert!(is_valid_broadcast(Some(&parsed)));
        assert_eq!(parsed.day, day);
        assert_eq!(parsed.time.to_string(), time);
    }
}

#[test]
fn test_malformed_broadcasts_are_rejected() {
    for text in [
        "",
        "Saturdays 01:00 (JST)",
        "Caturdays at 01:00 (JST)",
        "Saturdays at 24:00 (JST)",
        "Saturdays at 01:60 (JST)",
        "Unknown",
    ] {
        assert!(parse_broadcast(text).is_none(), "{:?} should not parse", text);
    }
    assert!(!is_valid_broadcast(None));
}

#[test]
fn test_projection_to_same_offset_is_unchanged() {
    let local = project_to_local(
        DayOfWeek::Saturday,
        "01:00".parse().unwrap(),
        &SOURCE_ZONE,
        &Etc::GMTMinus9,
        monday_noon_utc(),
    )
    .unwrap();
    assert_eq!(local.local_day, DayOfWeek::Saturday);
    assert_eq!(local.local_time.to_string(), "01:00");
}

#[test]
fn test_projection_crosses_midnight_backwards() {
    let local = project_to_local(
        DayOfWeek::Saturday,
        "01:00".parse().unwrap(),
        &SOURCE_ZONE,
        &Etc::GMTPlus5,
        monday_noon_utc(),
    )
    .unwrap();
    assert_eq!(local.local_day, DayOfWeek::Friday);
    assert_eq!(local.local_time.to_string(), "11:00");
}

#[test]
fn test_epoch_and_text_projection_agree() {
    // Sat 2026-10-24 01:00 JST
    let epoch = 1_792_771_200;
    for zone in [Etc::GMTPlus5, America::Los_Angeles, Europe::Berlin, SOURCE_ZONE] {
        let from_text = project_to_local(
            DayOfWeek::Saturday,
            "01:00".parse().unwrap(),
            &SOURCE_ZONE,
            &zone,
            monday_noon_utc(),
        )
        .unwrap();
        let from_epoch = project_from_epoch(epoch, &zone).unwrap();
        assert_eq!(from_text.local_day, from_epoch.local_day, "day in {}", zone.name());
        assert_eq!(from_text.local_time, from_epoch.local_time, "time in {}", zone.name());
    }
}

#[test]
fn test_episode_minutes() {
    assert_eq!(episode_minutes(Some("1 hr 30 min")), 90);
    assert_eq!(episode_minutes(None), 24);
    assert_eq!(episode_minutes(Some("bad text")), 24);
}

#[test]
fn test_epoch_two_minutes_ahead_is_not_in_the_past() {
    let now = monday_noon_utc();
    let record = SourceRecord {
        identity_key: Some(7),
        title: "Soon".into(),
        next_airing_epoch: Some((now + Duration::minutes(2)).timestamp()),
        ..Default::default()
    };
    let titles = reconcile(&[], &[record]);
    assert!(matches!(titles[0].schedule, Schedule::Airing { .. }));

    for zone in [America::Chicago, Etc::GMTMinus14, SOURCE_ZONE] {
        let pass = RenderPass::new(now, zone);
        let occurrences = pass.occurrences(&titles);
        assert_eq!(occurrences.len(), 1);
        let start = occurrences[0].start.with_timezone(&Utc);
        assert!(start >= now - Duration::seconds(5), "{} in {}", start, zone.name());
        assert!(start < now + Duration::days(7));
        assert_eq!(start, now + Duration::minutes(2));
    }
}

#[test]
fn test_full_pipeline_is_idempotent_and_skips_bad_records() {
    let provider_a = vec![
        SourceRecord {
            identity_key: Some(1),
            title: "Good".into(),
            broadcast_text: Some("Thursdays at 22:00 (JST)".into()),
            ..Default::default()
        },
        SourceRecord {
            identity_key: Some(2),
            title: "Garbled".into(),
            broadcast_text: Some("Thirsdays at 22:00 (JST)".into()),
            ..Default::default()
        },
    ];
    let pass = RenderPass::new(monday_noon_utc(), America::New_York);

    let run = || {
        let titles = reconcile(&provider_a, &[]);
        (pass.occurrences(&titles), pass.recurrence_rules(&titles))
    };
    let first = run();
    assert_eq!(first, run());

    let (occurrences, rules) = first;
    assert_eq!(occurrences.len(), 1);
    assert_eq!(rules.len(), 1);
    // Thu 22:00 JST is Thu 09:00 in New York (EDT)
    assert_eq!(rules[0].days_of_week, vec![DayOfWeek::Thursday.index()]);
    assert_eq!(rules[0].start_time.to_string(), "09:00");
    assert_eq!(occurrences[0].start.format("%Y-%m-%d %H:%M").to_string(), "2026-10-22 09:00");
}

fn any_day() -> impl Strategy<Value = DayOfWeek> {
    prop::sample::select(DayOfWeek::all().to_vec())
}

fn any_zone() -> impl Strategy<Value = Tz> {
    prop::sample::select(vec![
        SOURCE_ZONE,
        Etc::GMTPlus5,
        Etc::GMTPlus12,
        Etc::GMTMinus14,
        America::New_York,
        America::Los_Angeles,
        Europe::Berlin,
        chrono_tz::Asia::Kolkata,
        chrono_tz::Australia::Adelaide,
    ])
}

proptest! {
    #[test]
    fn prop_well_formed_broadcasts_parse(
        day in any_day(),
        hour in 0u32..24,
        minute in 0u32..60,
        plural in any::<bool>(),
        padded in any::<bool>(),
        upper in any::<bool>(),
    ) {
        let name = if upper { day.name().to_uppercase() } else { day.name().to_string() };
        let suffix = if plural { "s" } else { "" };
        let time = if padded {
            format!("{:02}:{:02}", hour, minute)
        } else {
            format!("{}:{:02}", hour, minute)
        };
        let text = format!("{}{} at {} (JST)", name, suffix, time);

        let parsed = parse_broadcast(&text);
        prop_assert!(is_valid_broadcast(parsed.as_ref()), "{} should parse", text);
        let parsed = parsed.unwrap();
        prop_assert_eq!(parsed.day, day);
        prop_assert_eq!((parsed.time.hour(), parsed.time.minute()), (hour, minute));
    }

    #[test]
    fn prop_out_of_range_times_are_rejected(
        day in any_day(),
        (hour, minute) in prop_oneof![
            (24u32..100, 0u32..60),
            (0u32..24, 60u32..100),
        ],
    ) {
        let text = format!("{}s at {}:{:02} (JST)", day.name(), hour, minute);
        prop_assert!(parse_broadcast(&text).is_none(), "{} should not parse", text);
    }

    #[test]
    fn prop_anchor_is_within_the_coming_week(
        day in any_day(),
        hour in 0u32..24,
        minute in 0u32..60,
        zone in any_zone(),
        offset_secs in 0i64..(7 * 24 * 3600),
    ) {
        let now = monday_noon_utc() + Duration::seconds(offset_secs);
        let time = TimeOfDay::new(hour, minute).unwrap();
        let local = project_to_local(day, time, &SOURCE_ZONE, &zone, now).unwrap();
        let anchor = local.local_anchor.with_timezone(&Utc);
        prop_assert!(anchor + Duration::seconds(60) > now, "{} before {}", anchor, now);
        prop_assert!(anchor < now + Duration::days(7), "{} too far from {}", anchor, now);

        let from_epoch = project_from_epoch(anchor.timestamp(), &zone).unwrap();
        prop_assert_eq!(from_epoch.local_day, local.local_day);
        prop_assert_eq!(from_epoch.local_time, local.local_time);
    }
}
