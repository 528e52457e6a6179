//! Controller integration tests against the simulated MS-2000.
//!
//! Run with: cargo test --test controller_tests

use asi_stage::adapters::MockDevice;
use asi_stage::{
    AxisId, Controller, ControllerOptions, IlluminationState, LeadScrew, ParameterKind,
    ProtocolError, Setpoint, StageError, StageSetup, TtlOutMode,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn xy_setup() -> StageSetup {
    StageSetup::new(
        vec![AxisId::X, AxisId::Y],
        vec![LeadScrew::Standard, LeadScrew::Standard],
        vec![-50.0, -25.0],
        vec![50.0, 25.0],
    )
}

fn xyz_setup() -> StageSetup {
    StageSetup::new(
        vec![AxisId::X, AxisId::Y, AxisId::Z],
        vec![LeadScrew::Standard, LeadScrew::Standard, LeadScrew::Fine],
        vec![-50.0, -25.0, -10.0],
        vec![50.0, 25.0, 10.0],
    )
}

fn round_all(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| v.round()).collect()
}

fn options(stage: StageSetup) -> ControllerOptions {
    ControllerOptions {
        stage: Some(stage),
        ..Default::default()
    }
}

fn open_xy(device: &MockDevice) -> Controller<MockDevice> {
    Controller::with_transport(device.clone(), options(xy_setup())).unwrap()
}

#[test]
fn test_default_state_for_every_layout() {
    let layouts = [
        (vec![AxisId::Z], vec![LeadScrew::Fine]),
        (vec![AxisId::X, AxisId::Y], vec![LeadScrew::Standard, LeadScrew::ExtraFine]),
        (
            vec![AxisId::X, AxisId::Y, AxisId::Z],
            vec![LeadScrew::UltraCourse, LeadScrew::SuperCourse, LeadScrew::Fine],
        ),
    ];
    for (axes, screws) in layouts {
        let n = axes.len();
        let setup = StageSetup::new(axes, screws.clone(), vec![-1.0; n], vec![1.0; n]);
        let controller = Controller::with_transport(MockDevice::new(), options(setup)).unwrap();
        let state = controller.state();

        let expected_velocity: Vec<f64> = screws
            .iter()
            .map(|s| (0.67 * s.max_velocity_mmps() * 1e6).round() / 1e6)
            .collect();
        assert_eq!(state.velocity_mmps, expected_velocity);
        assert_eq!(state.acceleration_ms, vec![25.0; n]);
        assert_eq!(state.settle_time_ms, vec![0.0; n]);
        assert_eq!(state.precision_um, vec![1.0; n]);
        assert_eq!(controller.position_um(), vec![0.0; n].as_slice());
        assert!(!controller.is_moving());
    }
}

#[test]
fn test_open_sequence() {
    let device = MockDevice::new();
    let _controller = open_xy(&device);
    let commands = device.commands();
    assert_eq!(&commands[..5], ["V", "TTL X=0", "TTL X?", "TTL Y=0", "TTL Y?"]);
    assert_eq!(commands[5], "S X=4.690000 Y=4.690000");
    assert_eq!(commands[6], "S X? Y?");
    assert_eq!(commands.last().map(String::as_str), Some("W X Y"));
}

#[test]
fn test_parameters_set_then_get() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);

    controller
        .set_velocity_mmps(&[Setpoint::Value(2.5), Setpoint::Keep])
        .unwrap();
    assert_eq!(controller.get_velocity_mmps().unwrap(), vec![2.5, 4.69]);

    controller
        .set_acceleration_ms(&Setpoint::values(&[100.0, 250.0]))
        .unwrap();
    assert_eq!(controller.get_acceleration_ms().unwrap(), vec![100.0, 250.0]);

    controller
        .set_settle_time_ms(&[Setpoint::Keep, Setpoint::Value(10.0)])
        .unwrap();
    assert_eq!(controller.get_settle_time_ms().unwrap(), vec![0.0, 10.0]);

    controller
        .set_precision_um(&Setpoint::values(&[5.0, 20.0]))
        .unwrap();
    assert!(device.commands().contains(&"PC X=0.000005 Y=0.000020".to_string()));
    assert_eq!(controller.get_precision_um().unwrap(), vec![5.0, 20.0]);
    assert_eq!(
        controller.state().parameter(ParameterKind::Precision),
        &[5.0, 20.0]
    );
}

#[test]
fn test_clamped_velocity_fails_verification() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    device.clamp_velocity(3.0);

    let err = controller
        .set_velocity_mmps(&[Setpoint::Value(4.0), Setpoint::Keep])
        .unwrap_err();
    assert!(err.is_verification());
    assert_eq!(controller.state().velocity_mmps, vec![3.0, 3.0]);
}

#[test]
fn test_settle_time_tolerance() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);

    device.set_settle_offset_ms(1.0);
    controller
        .set_settle_time_ms(&Setpoint::values(&[10.0, 20.0]))
        .unwrap();
    device.set_settle_offset_ms(-1.0);
    controller
        .set_settle_time_ms(&Setpoint::values(&[10.0, 20.0]))
        .unwrap();

    device.set_settle_offset_ms(2.0);
    let err = controller
        .set_settle_time_ms(&Setpoint::values(&[10.0, 20.0]))
        .unwrap_err();
    assert!(matches!(
        err,
        StageError::Verification {
            parameter: "settle time (ms)",
            ..
        }
    ));
}

#[test]
fn test_out_of_range_parameter_sends_nothing() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    device.clear_log();

    let err = controller
        .set_velocity_mmps(&Setpoint::values(&[7.5, 1.0]))
        .unwrap_err();
    assert!(matches!(err, StageError::Range { .. }));
    assert!(device.commands().is_empty());
}

#[test]
fn test_xy_relative_move() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);

    controller
        .move_um(&Setpoint::values(&[0.0, 0.0]), false, true)
        .unwrap();
    controller
        .move_um(&Setpoint::values(&[2000.0, 1000.0]), true, true)
        .unwrap();

    assert_eq!(controller.position_um(), &[2000.0, 1000.0]);
    assert_eq!(device.position_counts(AxisId::X), 20000.0);
    assert_eq!(device.position_counts(AxisId::Y), 10000.0);
    assert!(device
        .commands()
        .contains(&"M X=20000.000000 Y=10000.000000".to_string()));
}

#[test]
fn test_relative_moves_compose() {
    let stepped_device = MockDevice::new();
    let mut stepped = open_xy(&stepped_device);
    stepped
        .move_um(&Setpoint::values(&[100.0, -50.0]), false, true)
        .unwrap();
    stepped
        .move_um(&[Setpoint::Value(300.0), Setpoint::Keep], true, true)
        .unwrap();
    stepped
        .move_um(&Setpoint::values(&[-50.5, 20.0]), true, true)
        .unwrap();

    let direct_device = MockDevice::new();
    let mut direct = open_xy(&direct_device);
    direct
        .move_um(&Setpoint::values(&[349.5, -30.0]), false, true)
        .unwrap();

    for (a, b) in stepped.position_um().iter().zip(direct.position_um()) {
        assert!((a - b).abs() <= 1.0);
    }
}

#[test]
fn test_out_of_range_move_sends_nothing() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    device.clear_log();

    let err = controller
        .move_um(&Setpoint::values(&[60_000.0, 0.0]), false, true)
        .unwrap_err();
    assert!(matches!(err, StageError::Range { .. }));

    let err = controller
        .move_um(&[Setpoint::Keep, Setpoint::Value(-25_001.0)], true, true)
        .unwrap_err();
    assert!(matches!(err, StageError::Range { .. }));

    assert!(controller.move_um(&[Setpoint::Keep], true, true).is_err());
    assert!(device.commands().is_empty());
}

#[test]
fn test_non_blocking_move_finishes_later() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    device.set_busy_polls(3);

    controller
        .move_um(&Setpoint::values(&[500.0, 0.0]), false, false)
        .unwrap();
    assert!(controller.is_moving());
    assert_eq!(
        device.commands().last().map(String::as_str),
        Some("M X=5000.000000 Y=0.000000")
    );

    device.clear_log();
    controller
        .move_um(&Setpoint::values(&[100.0, 0.0]), true, true)
        .unwrap();
    let commands = device.commands();
    // busy three times, idle, then the position check for the first move
    assert_eq!(&commands[..5], ["/", "/", "/", "/", "W X Y"]);
    assert_eq!(controller.position_um(), &[600.0, 0.0]);
    assert!(!controller.is_moving());
}

#[test]
fn test_motion_tolerance() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);

    device.set_position_error_counts(5.0);
    controller
        .move_um(&Setpoint::values(&[1000.0, 0.0]), false, true)
        .unwrap();

    device.set_position_error_counts(25.0);
    let err = controller
        .move_um(&Setpoint::values(&[2000.0, 0.0]), false, true)
        .unwrap_err();
    match err {
        StageError::MotionTolerance {
            axis,
            target_um,
            position_um,
            precision_um,
        } => {
            assert_eq!(axis, AxisId::X);
            assert_eq!(target_um, 2000.0);
            assert_eq!(position_um, 2002.5);
            assert_eq!(precision_um, 1.0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!controller.is_moving());

    device.set_position_error_counts(0.0);
    controller
        .move_um(&Setpoint::values(&[0.0, 0.0]), false, true)
        .unwrap();
}

#[test]
fn test_motion_timeout_keeps_move_outstanding() {
    let device = MockDevice::new();
    let mut controller = Controller::with_transport(
        device.clone(),
        ControllerOptions {
            motion_timeout: Some(Duration::ZERO),
            ..options(xy_setup())
        },
    )
    .unwrap();
    device.set_busy_polls(1000);

    let err = controller
        .move_um(&Setpoint::values(&[10.0, 10.0]), false, true)
        .unwrap_err();
    assert!(matches!(err, StageError::MotionTimeout(_)));
    assert!(controller.is_moving());

    controller.set_motion_timeout(None);
    controller.finish_moving().unwrap();
    assert!(!controller.is_moving());
    assert_eq!(controller.position_um(), &[10.0, 10.0]);
}

#[test]
fn test_encoder_override() {
    let device = MockDevice::new();
    let setup = xy_setup().with_encoder_counts(vec![20, 4]);
    let mut controller = Controller::with_transport(device.clone(), options(setup)).unwrap();

    controller
        .move_um(&Setpoint::values(&[100.0, 100.0]), false, true)
        .unwrap();
    assert_eq!(device.position_counts(AxisId::X), 2000.0);
    assert_eq!(device.position_counts(AxisId::Y), 400.0);
    assert_eq!(controller.position_um(), &[100.0, 100.0]);
}

#[test]
fn test_keyed_position_reply() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);

    device.script_response(":A X=100 Y=-200 \r\n");
    assert_eq!(controller.get_position_um().unwrap(), vec![10.0, -20.0]);

    device.script_response(":A Y=100 X=-200 \r\n");
    let err = controller.get_position_um().unwrap_err();
    assert!(matches!(
        err,
        StageError::Protocol(ProtocolError::AxisMismatch { .. })
    ));
}

#[test]
fn test_illumination_states() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);

    for state in IlluminationState::ALL {
        controller.set_illumination(state).unwrap();
        let (ttl_in, ttl_out) = state.modes();
        assert_eq!(controller.get_ttl_in_mode().unwrap(), ttl_in);
        assert_eq!(controller.get_ttl_out_mode().unwrap(), ttl_out);
        assert_eq!(device.ttl_codes(), (ttl_in.code(), ttl_out.code()));
        assert_eq!(controller.illumination(), Some(state));
    }
}

#[test]
fn test_manual_ttl_write_clears_state() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);

    controller.set_illumination(IlluminationState::On).unwrap();
    controller.set_ttl_out_mode(TtlOutMode::Pwm).unwrap();
    assert_eq!(controller.illumination(), None);
    assert_eq!(controller.state().ttl_out_mode, TtlOutMode::Pwm);
}

#[test]
fn test_ignored_ttl_write_fails_verification() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    device.ignore_writes("TTL");

    let err = controller
        .set_illumination(IlluminationState::External)
        .unwrap_err();
    assert!(err.is_verification());
    assert_eq!(controller.illumination(), None);
}

#[test]
fn test_intensity() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    device.clear_log();

    let err = controller.set_intensity(150).unwrap_err();
    assert!(matches!(err, StageError::Range { .. }));
    assert!(controller.set_intensity(0).is_err());
    assert!(device.commands().is_empty());

    controller.set_intensity(50).unwrap();
    assert_eq!(controller.get_intensity().unwrap(), 50);
    assert_eq!(device.led(), 50);
    assert_eq!(controller.state().pwm_intensity, Some(50));
}

#[test]
fn test_use_pwm_at_open() {
    let device = MockDevice::new();
    let controller = Controller::with_transport(
        device.clone(),
        ControllerOptions {
            use_pwm: true,
            ..options(xy_setup())
        },
    )
    .unwrap();
    assert_eq!(controller.illumination(), Some(IlluminationState::Off));
    assert_eq!(controller.state().pwm_intensity, Some(1));
    assert!(device.commands().contains(&"LED X=1".to_string()));
}

#[test]
fn test_close_turns_light_off() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    controller.set_illumination(IlluminationState::On).unwrap();
    controller.close().unwrap();
    assert_eq!(device.ttl_codes(), (0, 0));

    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    controller.set_illumination(IlluminationState::Off).unwrap();
    device.clear_log();
    controller.close().unwrap();
    assert!(device.commands().is_empty());
}

#[test]
fn test_parameters_at_range_edges() {
    let device = MockDevice::new();
    let mut controller =
        Controller::with_transport(device.clone(), options(xyz_setup())).unwrap();

    controller
        .set_velocity_mmps(&Setpoint::values(&[7.0, 7.0, 1.75]))
        .unwrap();
    assert_eq!(controller.get_velocity_mmps().unwrap(), vec![7.0, 7.0, 1.75]);
    controller
        .set_velocity_mmps(&Setpoint::values(&[0.0; 3]))
        .unwrap();
    assert_eq!(controller.get_velocity_mmps().unwrap(), vec![0.0; 3]);

    controller
        .set_acceleration_ms(&Setpoint::values(&[1000.0; 3]))
        .unwrap();
    assert_eq!(controller.get_acceleration_ms().unwrap(), vec![1000.0; 3]);
    controller
        .set_acceleration_ms(&Setpoint::values(&[25.0; 3]))
        .unwrap();
    assert_eq!(controller.get_acceleration_ms().unwrap(), vec![25.0; 3]);

    controller
        .set_settle_time_ms(&Setpoint::values(&[1000.0; 3]))
        .unwrap();
    assert_eq!(controller.get_settle_time_ms().unwrap(), vec![1000.0; 3]);
    controller
        .set_settle_time_ms(&Setpoint::values(&[0.0; 3]))
        .unwrap();
    assert_eq!(controller.get_settle_time_ms().unwrap(), vec![0.0; 3]);

    controller
        .set_precision_um(&Setpoint::values(&[1e6; 3]))
        .unwrap();
    assert!(device
        .commands()
        .contains(&"PC X=1.000000 Y=1.000000 Z=1.000000".to_string()));
    assert_eq!(controller.get_precision_um().unwrap(), vec![1e6; 3]);
    controller
        .set_precision_um(&Setpoint::values(&[1.0; 3]))
        .unwrap();
    assert_eq!(controller.get_precision_um().unwrap(), vec![1.0; 3]);

    for intensity in [1, 99] {
        controller.set_intensity(intensity).unwrap();
        assert_eq!(controller.get_intensity().unwrap(), intensity);
    }

    controller
        .move_um(&Setpoint::values(&[50_000.0, -25_000.0, 10_000.0]), false, true)
        .unwrap();
    assert_eq!(controller.position_um(), &[50_000.0, -25_000.0, 10_000.0]);
    controller
        .move_um(&Setpoint::values(&[-50_000.0, 25_000.0, -10_000.0]), false, true)
        .unwrap();
    assert_eq!(controller.position_um(), &[-50_000.0, 25_000.0, -10_000.0]);
}

#[test]
fn test_ignored_intensity_write_fails_verification() {
    let device = MockDevice::new();
    let mut controller = open_xy(&device);
    device.ignore_writes("LED");

    let err = controller.set_intensity(50).unwrap_err();
    assert!(matches!(
        err,
        StageError::Verification {
            parameter: "pwm intensity (%)",
            ..
        }
    ));
    assert_eq!(device.led(), 1);
    assert_eq!(controller.state().pwm_intensity, Some(1));
}

#[test]
fn test_seeded_parameter_and_move_sweep() {
    let device = MockDevice::new();
    let mut controller =
        Controller::with_transport(device.clone(), options(xyz_setup())).unwrap();
    let geometry = controller.geometry().unwrap().clone();
    let mut rng = StdRng::seed_from_u64(0x4d53_3230);

    for _ in 0..300 {
        let mut velocity = Vec::new();
        let mut acceleration = Vec::new();
        let mut settle = Vec::new();
        let mut precision = Vec::new();
        let mut target = Vec::new();
        for axis in geometry.iter() {
            velocity.push(rng.gen_range(1.0..=axis.max_velocity_mmps));
            acceleration.push(rng.gen_range(axis.min_acceleration_ms..=axis.max_acceleration_ms));
            settle.push(rng.gen_range(0.0..=axis.max_settle_time_ms));
            precision.push(rng.gen_range(axis.min_precision_um..=axis.max_precision_um));
            // a tenth of the travel, as a bench run would use
            target.push(rng.gen_range(axis.min_position_um / 10.0..=axis.max_position_um / 10.0));
        }

        controller.set_velocity_mmps(&Setpoint::values(&velocity)).unwrap();
        controller
            .set_acceleration_ms(&Setpoint::values(&acceleration))
            .unwrap();
        controller.set_settle_time_ms(&Setpoint::values(&settle)).unwrap();
        controller.set_precision_um(&Setpoint::values(&precision)).unwrap();

        let rounded_velocity: Vec<f64> =
            velocity.iter().map(|v| (v * 1e6).round() / 1e6).collect();
        assert_eq!(controller.get_velocity_mmps().unwrap(), rounded_velocity);
        assert_eq!(controller.get_acceleration_ms().unwrap(), round_all(&acceleration));
        assert_eq!(controller.get_settle_time_ms().unwrap(), round_all(&settle));
        assert_eq!(controller.get_precision_um().unwrap(), round_all(&precision));

        controller
            .move_um(&Setpoint::values(&target), false, true)
            .unwrap();
        for (reached, wanted) in controller.position_um().iter().zip(&target) {
            assert!((reached - wanted).abs() <= 1.0);
        }
    }

    // fastest settings, then moves only
    let fastest: Vec<f64> = geometry.iter().map(|a| a.max_velocity_mmps).collect();
    controller.set_velocity_mmps(&Setpoint::values(&fastest)).unwrap();
    controller.set_acceleration_ms(&Setpoint::values(&[25.0; 3])).unwrap();
    controller.set_settle_time_ms(&Setpoint::values(&[0.0; 3])).unwrap();
    controller.set_precision_um(&Setpoint::values(&[1.0; 3])).unwrap();
    for _ in 0..300 {
        let target: Vec<f64> = geometry
            .iter()
            .map(|a| rng.gen_range(a.min_position_um / 10.0..=a.max_position_um / 10.0))
            .collect();
        controller
            .move_um(&Setpoint::values(&target), false, true)
            .unwrap();
    }
    controller
        .move_um(&Setpoint::values(&[0.0; 3]), false, true)
        .unwrap();
    assert_eq!(controller.position_um(), &[0.0; 3]);
}
