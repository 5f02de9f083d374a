//! Effect controller lifecycle against observed native calls.

mod helpers;

use approx::assert_relative_eq;
use helpers::*;
use holdfast::core::Error as CoreError;
use holdfast::prelude::*;
use holdfast::{EffectKind, EffectParameters};
use holdfast_core::mock::EngineCall;

fn f32_at(bytes: &[u8], index: usize) -> f32 {
    let start = index * 4;
    f32::from_ne_bytes(bytes[start..start + 4].try_into().unwrap())
}

#[test]
fn reverb_lifecycle_on_channel_7() {
    let (engine, holdfast) = mock_holdfast_with(DispatchMode::Inline, 7);
    let channel = engine.create_channel();
    assert_eq!(channel, NativeHandle(7));

    let reverb = holdfast.effect::<Freeverb>(channel, 0).unwrap();
    assert_eq!(reverb.state(), ActivationState::Inactive);
    engine.clear_calls();

    // Buffered while Inactive
    reverb.set_room_size(0.8).unwrap();
    assert!(engine.calls().is_empty());

    reverb.activate().unwrap();
    assert_eq!(attach_calls(&engine), 1);
    assert_eq!(push_calls(&engine), 1);
    assert_eq!(
        engine.calls()[0],
        EngineCall::AttachEffect {
            handle: channel,
            kind: EffectKind::Freeverb,
            priority: 0,
        }
    );

    reverb.set_damp(0.3).unwrap();
    assert_eq!(push_calls(&engine), 2);
    assert_eq!(attach_calls(&engine), 1);

    reverb.deactivate().unwrap();
    assert_eq!(detach_calls(&engine), 1);
    assert_relative_eq!(reverb.room_size(), 0.8);
    assert_relative_eq!(reverb.damp(), 0.3);

    reverb.activate().unwrap();
    assert_eq!(attach_calls(&engine), 2);
    assert_eq!(push_calls(&engine), 3);
    let pushed = last_push(&engine).unwrap();
    assert_relative_eq!(f32_at(&pushed, 2), 0.8);
    assert_relative_eq!(f32_at(&pushed, 3), 0.3);

    reverb.dispose().unwrap();
    assert_eq!(detach_calls(&engine), 2);
    assert_eq!(holdfast.registry().resource_count(channel), 0);

    let calls_after_dispose = engine.calls().len();
    reverb.dispose().unwrap();
    drop(reverb);
    assert_eq!(engine.calls().len(), calls_after_dispose);
}

#[test]
fn pushed_block_matches_local_block() {
    let (engine, holdfast) = mock_holdfast();
    let channel = engine.create_channel();
    let echo = holdfast.effect::<Echo>(channel, 1).unwrap();
    echo.activate().unwrap();
    echo.set_delay(1.5).unwrap();
    echo.set_stereo(true).unwrap();

    let effect = echo.effect_handle().unwrap();
    assert_eq!(
        engine.effect_params(effect).unwrap(),
        echo.params().as_bytes().to_vec()
    );
}

#[test]
fn rebind_preserves_state_and_parameters() {
    let (engine, holdfast) = mock_holdfast();
    let old = engine.create_channel();
    let new = engine.create_channel();

    let compressor = holdfast.effect::<Compressor>(old, 3).unwrap();
    compressor.set_threshold(-24.0).unwrap();
    compressor.set_ratio(4.0).unwrap();
    compressor.activate().unwrap();
    let before = compressor.params();

    compressor.rebind(new).unwrap();

    assert!(compressor.is_active());
    assert_eq!(compressor.channel(), new);
    assert_eq!(compressor.params(), before);
    assert_eq!(holdfast.registry().resource_count(old), 0);
    assert!(engine.effects_on(old).is_empty());

    let attached = engine.effects_on(new);
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].priority, 3);
    assert_eq!(attached[0].params.as_deref(), Some(before.as_bytes()));
}

#[test]
fn rebind_inactive_stays_inactive() {
    let (engine, holdfast) = mock_holdfast();
    let old = engine.create_channel();
    let new = engine.create_channel();
    let echo = holdfast.effect::<Echo>(old, 0).unwrap();
    engine.clear_calls();

    echo.rebind(new).unwrap();
    assert!(!echo.is_active());
    assert_eq!(attach_calls(&engine), 0);
    assert_eq!(holdfast.registry().resource_count(new), 1);
}

#[test]
fn old_channel_free_after_rebind_leaves_controller_alone() {
    let (engine, holdfast) = mock_holdfast();
    let old = engine.create_channel();
    let new = engine.create_channel();
    let echo = holdfast.effect::<Echo>(old, 0).unwrap();
    echo.activate().unwrap();
    echo.rebind(new).unwrap();

    engine.destroy(old);
    assert!(!echo.is_freed());
    assert!(echo.is_active());
    echo.set_feedback(-0.25).unwrap();
}

#[test]
fn rebind_after_free_follows_new_media() {
    let (engine, holdfast) = mock_holdfast();
    let first = holdfast.create_memory_stream(vec![0i16; 32], 0).unwrap();
    let reverb = holdfast.effect::<Freeverb>(first, 0).unwrap();
    reverb.set_width(0.5).unwrap();
    reverb.activate().unwrap();

    holdfast.free(first).unwrap();
    assert!(reverb.is_freed());
    assert!(matches!(
        reverb.activate(),
        Err(CoreError::HandleInvalid { .. })
    ));

    let second = holdfast.create_memory_stream(vec![0i16; 32], 0).unwrap();
    reverb.rebind(second).unwrap();
    assert!(!reverb.is_freed());
    assert!(reverb.is_active());
    assert_relative_eq!(reverb.width(), 0.5);

    let attached = engine.effects_on(second);
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].params.as_deref(), Some(reverb.params().as_bytes()));
    assert_eq!(holdfast.registry().resource_count(second), 2);
}

#[test]
fn deactivate_after_free_keeps_rebind_inactive() {
    let (engine, holdfast) = mock_holdfast();
    let first = engine.create_channel();
    let echo = holdfast.effect::<Echo>(first, 0).unwrap();
    echo.activate().unwrap();

    holdfast.free(first).unwrap();
    echo.deactivate().unwrap();

    let second = engine.create_channel();
    echo.rebind(second).unwrap();
    assert!(!echo.is_active());
    assert!(engine.effects_on(second).is_empty());
}

#[test]
fn failed_rebind_after_free_still_resumes_later() {
    let (engine, holdfast) = mock_holdfast();
    let first = engine.create_channel();
    let echo = holdfast.effect::<Echo>(first, 0).unwrap();
    echo.activate().unwrap();
    holdfast.free(first).unwrap();

    assert!(echo.rebind(NativeHandle(500)).is_err());
    assert!(echo.is_freed());

    let live = engine.create_channel();
    echo.rebind(live).unwrap();
    assert!(echo.is_active());
    assert_eq!(engine.effects_on(live).len(), 1);
}

#[test]
fn recycled_channel_value_does_not_revive_controller() {
    let (engine, holdfast) = mock_holdfast();
    let channel = engine.create_channel();
    let echo = holdfast.effect::<Echo>(channel, 0).unwrap();

    engine.destroy(channel);
    let reused = engine.create_channel();
    assert_eq!(reused, channel);

    assert!(echo.is_freed());
    assert!(echo.activate().is_err());
    assert!(engine.effects_on(reused).is_empty());
}

#[test]
fn controller_on_dead_channel_fails() {
    let (_engine, holdfast) = mock_holdfast();
    let err = holdfast.effect::<Echo>(NativeHandle(404), 0).unwrap_err();
    assert!(matches!(err.core(), CoreError::HandleInvalid { .. }));
    assert!(holdfast.registry().is_empty());
}

#[test]
fn priority_change_reattaches_only_when_active() {
    let (engine, holdfast) = mock_holdfast();
    let channel = engine.create_channel();
    let echo = holdfast.effect::<Echo>(channel, 0).unwrap();

    echo.set_priority(4).unwrap();
    assert_eq!(attach_calls(&engine), 0);
    echo.activate().unwrap();
    assert_eq!(engine.effects_on(channel)[0].priority, 4);

    echo.set_priority(-2).unwrap();
    assert_eq!(attach_calls(&engine), 2);
    assert_eq!(detach_calls(&engine), 1);
    assert_eq!(engine.effects_on(channel)[0].priority, -2);
    assert_eq!(echo.priority(), -2);
}

#[test]
fn push_failure_surfaces_distinctly() {
    let (engine, holdfast) = mock_holdfast();
    let channel = engine.create_channel();
    let reverb = holdfast.effect::<Freeverb>(channel, 0).unwrap();
    reverb.activate().unwrap();

    engine.fail_next_push(20);
    let err = reverb.set_room_size(0.1).unwrap_err();
    assert!(matches!(err, CoreError::ParameterPushFailure { code: 20, .. }));
    assert!(reverb.is_active());

    reverb.set_room_size(0.2).unwrap();
    assert_relative_eq!(f32_at(&last_push(&engine).unwrap(), 2), 0.2);
}
