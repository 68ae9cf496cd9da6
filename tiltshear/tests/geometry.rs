use tiltshear::{
    OpticalGeometry, compute_angular_extent, compute_correction,
    models::{PixelOffset, StepCommand},
    step_size::StepSizeTable,
};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn bench_offsets_become_step_commands() {
    let geometry = OpticalGeometry::default();
    let correction = compute_correction(
        PixelOffset::ORIGIN,
        PixelOffset::new(0.3702, 0.3702),
        PixelOffset::ORIGIN,
        PixelOffset::new(4.3, 4.3),
        &geometry,
    );

    let expected = [
        0.01657095849899587,
        0.0022330078676220185,
        0.0036844629815763323,
        0.024438561403736517,
    ];
    for (actual, expected) in correction.as_array().into_iter().zip(expected) {
        assert_close(actual, expected);
    }

    assert_eq!(
        StepSizeTable::default().step_commands(&correction),
        StepCommand {
            m1_axis1: -3,
            m1_axis2: 0,
            m2_axis1: -5,
            m2_axis2: -1,
        }
    );
}

#[test]
fn mirrored_offsets_away_from_the_origin() {
    let geometry = OpticalGeometry::default();
    let tilt_reference = PixelOffset::new(100.0, 50.0);
    let shear_reference = PixelOffset::new(-20.0, 10.0);

    let correction = compute_correction(
        tilt_reference,
        PixelOffset::new(100.3702, 49.6298),
        shear_reference,
        PixelOffset::new(-15.7, 5.7),
        &geometry,
    );

    let expected = [
        -0.0022330078676220185,
        -0.01657095849899587,
        -0.024438561403736517,
        -0.0036844629815763323,
    ];
    for (actual, expected) in correction.as_array().into_iter().zip(expected) {
        assert_close(actual, expected);
    }

    assert_eq!(
        StepSizeTable::default().step_commands(&correction),
        StepCommand {
            m1_axis1: 0,
            m1_axis2: 3,
            m2_axis1: 1,
            m2_axis2: 5,
        }
    );
}

#[test]
fn angular_extent_of_a_tilt_probe() {
    let geometry = OpticalGeometry::default();
    let reference = PixelOffset::new(10.0, 10.0);

    assert_close(
        compute_angular_extent(reference, PixelOffset::new(13.0, 6.0), &geometry),
        0.01909859299418862,
    );
    assert_close(
        compute_angular_extent(reference, PixelOffset::new(13.0, 14.0), &geometry),
        -0.01909859299418862,
    );
}
