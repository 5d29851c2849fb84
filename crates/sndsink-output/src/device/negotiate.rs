//! Matching requested stream parameters to what a device supports.

use sndsink_core::{Error, Result, SampleFormat, StreamParams};
use tracing::{debug, info};

use super::DeviceMode;

/// Resolve `requested` against the modes a device advertises.
///
/// Returns `requested` unchanged when some mode plays it as is. Otherwise
/// each mode contributes its closest candidate (the requested rate clamped
/// into the mode's range) and the best candidate wins by, in order: channel
/// distance, format penalty, rate distance, then the higher rate. Ties keep
/// the earlier mode.
pub fn negotiate(requested: &StreamParams, modes: &[DeviceMode]) -> Result<StreamParams> {
    requested.validate()?;

    let usable: Vec<&DeviceMode> = modes.iter().filter(|m| m.is_usable()).collect();
    if usable.is_empty() {
        return Err(Error::NegotiationFailed(
            "device reports no supported output modes".into(),
        ));
    }

    if usable.iter().any(|m| m.supports(requested)) {
        debug!("Device accepts {requested} as requested");
        return Ok(*requested);
    }

    let resolved = usable
        .iter()
        .map(|mode| {
            StreamParams::new(
                mode.clamp_rate(requested.sample_rate),
                mode.channels,
                mode.format,
            )
        })
        .min_by_key(|candidate| score(requested, candidate))
        .ok_or_else(|| Error::NegotiationFailed("no candidate parameters".into()))?;

    info!("Device rejected {requested}, falling back to {resolved}");
    Ok(resolved)
}

fn score(requested: &StreamParams, candidate: &StreamParams) -> (u16, u32, u32, u32) {
    (
        requested.channels.abs_diff(candidate.channels),
        format_penalty(requested.format, candidate.format),
        requested.sample_rate.abs_diff(candidate.sample_rate),
        u32::MAX - candidate.sample_rate,
    )
}

/// Cost of substituting `offered` for `wanted`; zero for the same format.
fn format_penalty(wanted: SampleFormat, offered: SampleFormat) -> u32 {
    if wanted == offered {
        return 0;
    }
    let (want, have) = (wanted.kind(), offered.kind());
    let width = u32::from(want.bits().abs_diff(have.bits())) / 8;
    if want == have {
        1
    } else if want.same_family(have) && have.bits() > want.bits() {
        10 + width
    } else if want.same_family(have) {
        20 + width
    } else {
        40 + width
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sndsink_core::SampleFormat::{F32Le, S16Be, S16Le, S24Le, S32Le, U16Le, U8};

    fn params(rate: u32, channels: u16, format: SampleFormat) -> StreamParams {
        StreamParams::new(rate, channels, format)
    }

    #[test]
    fn test_exact_match_is_returned_unchanged() {
        let modes = [
            DeviceMode::new(2, 8_000, 192_000, F32Le),
            DeviceMode::new(2, 8_000, 192_000, S16Le),
        ];
        let requested = params(44_100, 2, S16Le);
        assert_eq!(negotiate(&requested, &modes).unwrap(), requested);
    }

    #[test]
    fn test_rate_is_clamped() {
        let modes = [DeviceMode::new(2, 44_100, 48_000, S16Le)];
        let resolved = negotiate(&params(96_000, 2, S16Le), &modes).unwrap();
        assert_eq!(resolved, params(48_000, 2, S16Le));
    }

    #[test]
    fn test_prefers_other_endianness_over_wider() {
        let modes = [
            DeviceMode::fixed(2, 44_100, S32Le),
            DeviceMode::fixed(2, 44_100, S16Be),
        ];
        let resolved = negotiate(&params(44_100, 2, S16Le), &modes).unwrap();
        assert_eq!(resolved.format, S16Be);
    }

    #[test]
    fn test_prefers_wider_over_narrower_in_family() {
        let modes = [
            DeviceMode::fixed(2, 48_000, S16Le),
            DeviceMode::fixed(2, 48_000, S32Le),
        ];
        let resolved = negotiate(&params(48_000, 2, S24Le), &modes).unwrap();
        assert_eq!(resolved.format, S32Le);
    }

    #[test]
    fn test_other_family_prefers_closest_width() {
        let modes = [
            DeviceMode::fixed(2, 48_000, F32Le),
            DeviceMode::fixed(2, 48_000, U16Le),
            DeviceMode::fixed(2, 48_000, U8),
        ];
        let resolved = negotiate(&params(48_000, 2, S16Le), &modes).unwrap();
        assert_eq!(resolved.format, U16Le);
    }

    #[test]
    fn test_channels_outrank_format() {
        let modes = [
            DeviceMode::fixed(1, 44_100, S16Le),
            DeviceMode::fixed(2, 44_100, F32Le),
        ];
        let resolved = negotiate(&params(44_100, 2, S16Le), &modes).unwrap();
        assert_eq!(resolved, params(44_100, 2, F32Le));
    }

    #[test]
    fn test_format_outranks_rate() {
        let modes = [
            DeviceMode::fixed(2, 48_000, S16Le),
            DeviceMode::fixed(2, 44_100, F32Le),
        ];
        let resolved = negotiate(&params(44_100, 2, S16Le), &modes).unwrap();
        assert_eq!(resolved, params(48_000, 2, S16Le));
    }

    #[test]
    fn test_equal_distance_prefers_higher_rate() {
        let modes = [
            DeviceMode::fixed(2, 40_000, S16Le),
            DeviceMode::fixed(2, 50_000, S16Le),
        ];
        let resolved = negotiate(&params(45_000, 2, S16Le), &modes).unwrap();
        assert_eq!(resolved.sample_rate, 50_000);
    }

    #[test]
    fn test_no_modes_fails() {
        let err = negotiate(&params(44_100, 2, S16Le), &[]).unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed(_)));

        let unusable = [DeviceMode::fixed(0, 44_100, S16Le)];
        let err = negotiate(&params(44_100, 2, S16Le), &unusable).unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed(_)));
    }

    #[test]
    fn test_invalid_request_fails() {
        let modes = [DeviceMode::fixed(2, 44_100, S16Le)];
        assert!(matches!(
            negotiate(&params(0, 2, S16Le), &modes),
            Err(Error::InvalidParams(_))
        ));
        assert!(matches!(
            negotiate(&params(44_100, 0, S16Le), &modes),
            Err(Error::InvalidParams(_))
        ));
    }

    fn any_format() -> impl Strategy<Value = SampleFormat> {
        prop::sample::select(SampleFormat::ALL.to_vec())
    }

    fn any_mode() -> impl Strategy<Value = DeviceMode> {
        (1u16..=8, 8_000u32..=96_000, 0u32..=96_000, any_format()).prop_map(
            |(channels, min_rate, span, format)| {
                DeviceMode::new(channels, min_rate, min_rate + span, format)
            },
        )
    }

    fn any_params() -> impl Strategy<Value = StreamParams> {
        (1u32..=384_000, 1u16..=8, any_format())
            .prop_map(|(rate, channels, format)| StreamParams::new(rate, channels, format))
    }

    proptest! {
        #[test]
        fn prop_result_is_playable(requested in any_params(), modes in prop::collection::vec(any_mode(), 1..6)) {
            let resolved = negotiate(&requested, &modes).unwrap();
            prop_assert!(modes.iter().any(|m| m.supports(&resolved)));
        }

        #[test]
        fn prop_exact_when_possible(requested in any_params(), mut modes in prop::collection::vec(any_mode(), 0..5), at in 0usize..5) {
            let exact = DeviceMode::fixed(requested.channels, requested.sample_rate, requested.format);
            let at = at.min(modes.len());
            modes.insert(at, exact);
            prop_assert_eq!(negotiate(&requested, &modes).unwrap(), requested);
        }

        #[test]
        fn prop_deterministic(requested in any_params(), modes in prop::collection::vec(any_mode(), 1..6)) {
            prop_assert_eq!(negotiate(&requested, &modes).unwrap(), negotiate(&requested, &modes).unwrap());
        }
    }
}
