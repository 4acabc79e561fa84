use st_nn::{
    CarryState, Module, SequenceModule, SequenceTensor, SpiralConvConfig, SpiralConvStack,
    TensorError,
};

fn stack() -> SpiralConvStack {
    let config = SpiralConvConfig {
        depth: 2,
        dim: 3,
        ff_scale: 1.0,
        dropout: 0.0,
        seed: Some(17),
        ..SpiralConvConfig::default()
    };
    let mut stack = SpiralConvStack::from_config("stack", &config).unwrap();
    stack.set_training(false);
    stack
}

fn chunk(length: usize, batch: usize) -> SequenceTensor {
    SequenceTensor::from_fn(length, batch, 3, |t, b, c| ((t * 3 + c) as f32 * 0.4 - b as f32).cos())
        .unwrap()
}

#[test]
fn partial_reset_batch_change_leaves_every_carry_untouched() {
    let mut stack = stack();
    stack.forward(&chunk(4, 2)).unwrap();
    stack.block_mut(0).unwrap().reset();
    let before = stack.carries();
    assert_eq!(before[0].batch(), None);
    assert_eq!(before[1].batch(), Some(2));

    assert!(matches!(
        stack.forward(&chunk(3, 3)),
        Err(TensorError::ShapeMismatch { .. })
    ));
    assert_eq!(stack.carries(), before);

    // The original batch still streams from the partially reset state.
    stack.forward(&chunk(3, 2)).unwrap();
    assert!(stack.carries().iter().all(|carry| carry.batch() == Some(2)));
}

#[test]
fn full_reset_rebinds_the_batch() {
    let mut stack = stack();
    stack.forward(&chunk(4, 2)).unwrap();
    stack.reset();
    let out = stack.forward(&chunk(4, 3)).unwrap();
    assert_eq!(out.shape(), (4, 3, 3));
    assert!(stack.carries().iter().all(|carry| carry.batch() == Some(3)));
}

#[test]
fn restore_rejects_mixed_batches_without_touching_blocks() {
    let mut two = stack();
    two.forward(&chunk(3, 2)).unwrap();
    let mut three = stack();
    three.forward(&chunk(3, 3)).unwrap();

    let mut target = stack();
    target.forward(&chunk(2, 2)).unwrap();
    let before = target.carries();

    let mixed = vec![three.carries()[0].clone(), two.carries()[1].clone()];
    assert!(matches!(
        target.restore_carries(mixed),
        Err(TensorError::ShapeMismatch { .. })
    ));
    assert_eq!(target.carries(), before);

    // Uninitialised carries are free to sit next to any bound batch.
    let partial = vec![CarryState::new(), three.carries()[1].clone()];
    target.restore_carries(partial).unwrap();
    assert_eq!(target.carries()[0].batch(), None);
    assert_eq!(target.carries()[1].batch(), Some(3));
    target.forward(&chunk(2, 3)).unwrap();
}

#[test]
fn restore_rejects_carries_of_another_width() {
    let config = SpiralConvConfig {
        depth: 2,
        dim: 5,
        seed: Some(3),
        ..SpiralConvConfig::default()
    };
    let mut wide = SpiralConvStack::from_config("wide", &config).unwrap();
    wide.forward(&SequenceTensor::zeros(2, 2, 5).unwrap()).unwrap();

    let mut target = stack();
    let before = target.carries();
    let foreign = vec![CarryState::new(), wide.carries()[1].clone()];
    assert!(target.restore_carries(foreign).is_err());
    assert_eq!(target.carries(), before);
}
