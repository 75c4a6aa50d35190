// Integration tests for the model assemblies
//
// The single-hidden-layer sigmoid MLP scenario uses fixed weights and a
// fixed input, with forward values, loss, and parameter gradients checked
// against independently computed references.

use tapir::prelude::*;

fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            (g - e).abs() < tol,
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

// Single-hidden-layer sigmoid MLP with fixed parameters.

#[test]
fn test_sigmoid_layer_forward_loss_and_gradients() {
    let mut mlp = MultiLayerPerceptron::<f64>::new(2, &[3]).unwrap();
    mlp.weights[0]
        .set_value(Array2::from_vec(3, 2, vec![0.5, 0.5, 2.0, 3.0, 0.0, 6.0]))
        .unwrap();
    mlp.biases[0]
        .set_value(Array2::from_vec(3, 1, vec![-0.2, 0.2, 0.3]))
        .unwrap();

    let input = Tensor::input(Array2::from_vec(2, 1, vec![0.6, 0.4]), mlp.tape());
    let target = Tensor::input(Array2::from_vec(3, 1, vec![0.0, 1.0, 0.0]), mlp.tape());

    let output = mlp.forward(&input).unwrap();
    assert_vec_approx(
        output.value().as_slice(),
        &[0.5744, 0.9309, 0.9370],
        1e-4,
    );

    let loss = output.sub(&target).unwrap().squared_norm().unwrap();
    assert!((loss.value()[(0, 0)] - 1.2128).abs() < 1e-4);

    let grad = loss.grad().unwrap();
    let dw = grad.get(&mlp.weights[0]).unwrap();
    let db = grad.get(&mlp.biases[0]).unwrap();

    // δ = 2(a - t)·σ'(z); dW = δ·xᵀ; db = δ.
    assert_vec_approx(
        db.as_slice(),
        &[0.2808545, -0.0088993, 0.1105836],
        1e-4,
    );
    assert_vec_approx(
        dw.as_slice(),
        &[
            0.1685127, 0.1123418, -0.0053396, -0.0035597, 0.0663501, 0.0442334,
        ],
        1e-4,
    );
}

#[test]
fn test_mlp_two_layers_forward_is_composition() {
    let mut mlp = MultiLayerPerceptron::<f64>::new(2, &[2, 1]).unwrap();
    mlp.activation = Tensor::relu;
    mlp.weights[0]
        .set_value(Array2::from_vec(2, 2, vec![1.0, 0.0, 0.0, 1.0]))
        .unwrap();
    mlp.biases[0]
        .set_value(Array2::from_vec(2, 1, vec![0.0, 0.0]))
        .unwrap();
    mlp.weights[1]
        .set_value(Array2::from_vec(1, 2, vec![1.0, -1.0]))
        .unwrap();
    mlp.biases[1]
        .set_value(Array2::from_vec(1, 1, vec![0.5]))
        .unwrap();

    let input = Tensor::input(Array2::from_vec(2, 1, vec![3.0, 2.0]), mlp.tape());
    let out = mlp.forward(&input).unwrap();
    // relu(identity·x) = x, then relu(3 - 2 + 0.5) = 1.5
    assert_eq!(out.value()[(0, 0)], 1.5);
}

#[test]
fn test_model_trait_parameter_enumeration_order() {
    let mlp = MultiLayerPerceptron::<f64>::new(3, &[4, 2]).unwrap();
    let indices: Vec<usize> = mlp.parameters().iter().map(|p| p.index()).collect();
    // Creation order w0, b0, w1, b1 matches the tape order.
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(mlp.tape().trainable_indices(), indices);
}

#[test]
fn test_toggle_global_trainable() {
    let mlp = MultiLayerPerceptron::<f64>::new(3, &[2]).unwrap();
    assert_eq!(mlp.tape().param_count(), 2);

    mlp.toggle_global_trainable(false);
    assert_eq!(mlp.tape().param_count(), 0);

    mlp.toggle_global_trainable(true);
    assert_eq!(mlp.tape().param_count(), 2);
}

// CNN end to end.

#[test]
fn test_cnn_forward_backward_full_stack() {
    let cnn = ConvolutionalNetwork::<f64>::new(
        (6, 12),
        ChannelSplit::Vertical,
        2,
        &[(2, 2, 3), (2, 2, 2)],
        &[(0, 0), (2, 2)],
        &[4, 2],
    )
    .unwrap();

    // Per channel: 6x6 → conv 2x2 → 5x5 → conv 2x2 → 4x4 → pool → 2x2.
    // Flatten: 2 channels of 2x2 = 8 → dense 4 → dense 2.
    assert_eq!(cnn.conv_kernels[0].shape(), (3, 2 * 4));
    assert_eq!(cnn.conv_biases[0].shape(), (3, 25));
    assert_eq!(cnn.conv_kernels[1].shape(), (2, 3 * 4));
    assert_eq!(cnn.conv_biases[1].shape(), (2, 16));
    assert_eq!(cnn.weights[0].shape(), (4, 8));
    assert_eq!(cnn.weights[1].shape(), (2, 4));

    let input = Tensor::input(Array2::random(6, 12), cnn.tape());
    let target = Tensor::input(Array2::random(2, 1), cnn.tape());
    let out = cnn.forward(&input).unwrap();
    assert_eq!(out.shape(), (2, 1));

    let loss = out.sub(&target).unwrap().squared_norm().unwrap();
    let grad = loss.grad().unwrap();
    for p in cnn.parameters() {
        let dp = grad.get(p).unwrap();
        assert_eq!(dp.shape(), p.shape());
        // Sigmoid saturates but never has an exactly-zero slope, so some
        // gradient must reach every kernel matrix.
        if p.shape().1 > 1 {
            assert!(dp.squared_norm() > 0.0);
        }
    }

    cnn.tape().reset();
    assert_eq!(cnn.tape().len(), cnn.parameters().len());
}

#[test]
fn test_cnn_nosplit_single_channel() {
    let cnn = ConvolutionalNetwork::<f64>::new(
        (5, 5),
        ChannelSplit::NoSplit,
        1,
        &[(2, 2, 2)],
        &[(2, 2)],
        &[3],
    )
    .unwrap();
    let input = Tensor::input(Array2::random(5, 5), cnn.tape());
    let out = cnn.forward(&input).unwrap();
    assert_eq!(out.shape(), (3, 1));
}
