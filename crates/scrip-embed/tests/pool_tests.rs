use candle_core::{Device, Tensor, DType};
use scrip_embed::masked_mean_l2;
use scrip_embed::pool::cls_l2;

#[test]
fn masked_mean_l2_basic() {
    let dev = Device::Cpu;
    // Two tokens with hidden dim 4; second token is masked out.
    let h = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0,  // token 0
                                 5.0, 6.0, 7.0, 8.0],    // token 1
                               (1, 2, 4), &dev).unwrap();
    let mask = Tensor::from_slice(&[1i64, 0i64], (1, 2), &dev).unwrap()
        .to_dtype(DType::F32).unwrap();
    let out = masked_mean_l2(&h, &mask).unwrap();
    let v: Vec<Vec<f32>> = out.to_vec2().unwrap();
    let v = &v[0];
    // Mean over unmasked tokens = first token [1,2,3,4], then L2 normalize
    let norm: f32 = (1.0f32*1.0 + 2.0*2.0 + 3.0*3.0 + 4.0*4.0).sqrt();
    let expected = [1.0/norm, 2.0/norm, 3.0/norm, 4.0/norm];
    for (a,b) in v.iter().cloned().zip(expected) {
        assert!((a - b).abs() < 1e-5, "a={} b={}", a, b);
    }
}

#[test]
fn cls_pooling_takes_first_token() {
    let dev = Device::Cpu;
    let h = Tensor::from_slice(&[3.0f32, 4.0, 100.0, 100.0], (1, 2, 2), &dev).unwrap();
    let v: Vec<Vec<f32>> = cls_l2(&h).unwrap().to_vec2().unwrap();
    assert!((v[0][0] - 0.6).abs() < 1e-5);
    assert!((v[0][1] - 0.8).abs() < 1e-5);
}

#[test]
fn pool_dispatches_on_declared_strategy() {
    use scrip_embed::pool::pool;
    use scrip_embed::Pooling;

    let dev = Device::Cpu;
    // Token 0 is [0, 1], token 1 is [1, 0]; both unmasked.
    let h = Tensor::from_slice(&[0.0f32, 1.0, 1.0, 0.0], (1, 2, 2), &dev).unwrap();
    let mask = Tensor::from_slice(&[1u32, 1u32], (1, 2), &dev).unwrap();

    let cls: Vec<Vec<f32>> = pool(Pooling::Cls, &h, &mask).unwrap().to_vec2().unwrap();
    assert_eq!(cls[0], vec![0.0, 1.0]);

    let mean: Vec<Vec<f32>> = pool(Pooling::Mean, &h, &mask).unwrap().to_vec2().unwrap();
    let half = std::f32::consts::FRAC_1_SQRT_2;
    assert!((mean[0][0] - half).abs() < 1e-5 && (mean[0][1] - half).abs() < 1e-5);
}
