use st_nn::{
    CarryPolicy, Module, SequenceModule, SequenceTensor, SpiralConvConfig,
    SpiralConvLanguageModel, SpiralConvStack, TensorError,
};

fn config() -> SpiralConvConfig {
    SpiralConvConfig {
        depth: 3,
        dim: 4,
        ff_scale: 1.5,
        dropout: 0.25,
        seed: Some(5),
        vocab_size: 7,
        ..SpiralConvConfig::default()
    }
}

fn signal(length: usize) -> SequenceTensor {
    SequenceTensor::from_fn(length, 2, 4, |t, b, c| ((t * 4 + c) as f32 * 0.3 + b as f32).sin())
        .unwrap()
}

#[test]
fn reset_restores_fresh_behaviour() {
    let mut stack = SpiralConvStack::from_config("stack", &config()).unwrap();
    stack.set_training(false);
    let fresh = stack.forward(&signal(5)).unwrap();
    stack.forward(&signal(7)).unwrap();
    stack.reset();
    assert_eq!(stack.forward(&signal(5)).unwrap(), fresh);
}

#[test]
fn frozen_stack_evaluates_against_fixed_context() {
    let mut stack = SpiralConvStack::from_config("stack", &config()).unwrap();
    stack.set_training(false);
    stack.forward(&signal(6)).unwrap();
    let context = stack.carries();

    stack.set_refresh(false);
    let first = stack.forward(&signal(3)).unwrap();
    let second = stack.forward(&signal(3)).unwrap();
    assert_eq!(first, second);
    assert_eq!(stack.carries(), context);

    stack.set_refresh(true);
    stack.forward(&signal(3)).unwrap();
    assert_ne!(stack.carries(), context);
}

#[test]
fn training_mode_makes_dropout_stochastic() {
    let mut stack = SpiralConvStack::from_config("stack", &config()).unwrap();
    stack.set_refresh(false);
    let a = stack.forward(&signal(4)).unwrap();
    let b = stack.forward(&signal(4)).unwrap();
    assert_ne!(a, b);

    stack.set_training(false);
    let c = stack.forward(&signal(4)).unwrap();
    let d = stack.forward(&signal(4)).unwrap();
    assert_eq!(c, d);
}

#[test]
fn batch_changes_require_reset() {
    let mut stack = SpiralConvStack::from_config("stack", &config()).unwrap();
    stack.forward(&signal(2)).unwrap();
    let wider = SequenceTensor::zeros(2, 3, 4).unwrap();
    assert!(matches!(
        stack.forward(&wider),
        Err(TensorError::ShapeMismatch { .. })
    ));
    stack.reset();
    assert_eq!(stack.forward(&wider).unwrap().shape(), (2, 3, 4));
}

#[test]
fn state_dict_round_trip_preserves_outputs() {
    let mut source = SpiralConvStack::from_config("stack", &config()).unwrap();
    let mut target = SpiralConvStack::from_config(
        "stack",
        &SpiralConvConfig {
            seed: Some(6),
            carry_policy: CarryPolicy::Continuous,
            ..config()
        },
    )
    .unwrap();
    source.set_training(false);
    target.set_training(false);
    target.load_state_dict(&source.state_dict().unwrap()).unwrap();
    assert_eq!(
        target.forward(&signal(5)).unwrap(),
        source.forward(&signal(5)).unwrap()
    );
}

#[test]
fn language_model_streams_like_one_shot() {
    let tokens: Vec<usize> = (0..12).map(|i| (i * 3 + 1) % 7).collect();

    let mut whole = SpiralConvLanguageModel::from_config("lm", &config()).unwrap();
    whole.set_training(false);
    let reference = whole.forward(&tokens, 6, 2).unwrap();

    let mut streamed = SpiralConvLanguageModel::from_config("lm", &config()).unwrap();
    streamed.set_training(false);
    let head = streamed.forward(&tokens[..4], 2, 2).unwrap();
    let tail = streamed.forward(&tokens[4..], 4, 2).unwrap();
    let joined = SequenceTensor::concat_time(&[head, tail]).unwrap();
    assert!(joined.max_abs_diff(&reference).unwrap() < 1e-3);

    let targets: Vec<usize> = tokens.iter().map(|t| (t + 1) % 7).collect();
    let loss = whole.cross_entropy(&reference, &targets).unwrap();
    assert!(loss.is_finite() && loss > 0.0);
}
