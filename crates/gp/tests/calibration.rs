use approx::assert_abs_diff_eq;
use mgpi_gp::*;
use ndarray::{Array, Array2, Axis};
use std::f64::consts::PI;

fn sin_data(n: usize) -> TrainingSet<f64> {
    let xt = Array::linspace(0., 2. * PI, n).insert_axis(Axis(1));
    let ft = xt.column(0).mapv(f64::sin);
    TrainingSet::new(xt, ft).unwrap()
}

fn rmse<K: Kernel<f64> + ?Sized>(gp: &GaussianProcessModel<f64, K>) -> f64 {
    let xtest: Array2<f64> = Array::linspace(0., 2. * PI, 200).insert_axis(Axis(1));
    let mean = gp.predict_mean(&xtest).unwrap();
    let err = mean - xtest.column(0).mapv(f64::sin);
    err.mapv(|e| e * e).mean().unwrap().sqrt()
}

#[test]
fn test_sin_recovery_cobyla() {
    let _ = env_logger::builder().is_test(true).try_init();
    let data = sin_data(20);
    let kernel = SquaredExponentialKernel::new(1);
    let factory = |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.01);
    let prior = LogPrior::build(kernel.registry(), &[Bound::new("length0", 0.1, 10.)], &[]).unwrap();
    let init = HyperParams::from_elem(kernel.registry().clone(), 1.);

    let optimizer = HyperparameterOptimizer::new(
        HyperparameterOptimizer::params()
            .method(OptimMethod::Cobyla)
            .seed(Some(42)),
    )
    .unwrap();
    let best = optimizer.optimize(&factory, &prior, &init).unwrap();
    let length = best.params.get("length0").unwrap();
    assert!((0.1..=10.).contains(&length), "length0={length}");

    let gp = factory(&best.params).unwrap();
    let error = rmse(&gp);
    assert!(error < 0.05, "rmse={error} at {}", best.params);

    let start = TemperedPosterior::new(&factory, &prior, 1.)
        .unwrap()
        .log_prob(prior.split(&init).view())
        .unwrap();
    assert!(best.objective >= start);
}

#[test]
fn test_sin_recovery_fixed_white_noise() {
    let data = sin_data(20);
    let kernel = SumKernel::new(vec![
        Box::new(SquaredExponentialKernel::new(1)) as Box<dyn Kernel<f64>>,
        Box::new(WhiteNoiseKernel::new()),
    ])
    .unwrap();
    let factory = |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.);
    let prior = LogPrior::build(
        kernel.registry(),
        &[Bound::new("length0", 0.1, 10.)],
        &[Fixed::new("noise", 0.01)],
    )
    .unwrap();
    assert_eq!(prior.free_names(), &["sigma", "length0"]);
    let init = HyperParams::from_elem(kernel.registry().clone(), 1.);

    let optimizer = HyperparameterOptimizer::new(
        HyperparameterOptimizer::params()
            .method(OptimMethod::Slsqp)
            .seed(Some(7)),
    )
    .unwrap();
    let best = optimizer.optimize(&factory, &prior, &init).unwrap();
    assert_eq!(best.params.get("noise"), Some(0.01));
    let gp = factory(&best.params).unwrap();
    let error = rmse(&gp);
    assert!(error < 0.05, "rmse={error} at {}", best.params);
}

#[test]
fn test_gp_posterior_sampling() {
    let data = sin_data(12);
    let kernel = Matern52Kernel::new(1);
    let factory = |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.01);
    let prior = LogPrior::build(
        kernel.registry(),
        &[Bound::new("length0", 0.5, 5.)],
        &[Fixed::new("sigma", 1.)],
    )
    .unwrap();
    let init = HyperParams::from_elem(kernel.registry().clone(), 1.);
    let sampler = |seed| {
        HyperparameterSampler::new(
            HyperparameterSampler::params()
                .n_burnin(20)
                .n_samples(30)
                .temperature(2.)
                .seed(Some(seed)),
        )
        .unwrap()
    };

    let chain = sampler(3).sample(&factory, &prior, &init).unwrap();
    assert_eq!(chain.n_walkers, 4);
    assert_eq!(chain.samples.dim(), (30 * 4, 2));
    assert!(chain.column("sigma").unwrap().iter().all(|&s| s == 1.));
    assert!(chain
        .column("length0")
        .unwrap()
        .iter()
        .all(|&l| (0.5..=5.).contains(&l)));
    assert!(chain.log_probs.iter().all(|v| v.is_finite()));

    // every retained log posterior is the tempered posterior at its sample
    let posterior = TemperedPosterior::new(&factory, &prior, 2.).unwrap();
    let row = chain.samples.row(17);
    let params = HyperParams::new(kernel.registry().clone(), row.to_owned()).unwrap();
    assert_abs_diff_eq!(
        posterior.log_prob(prior.split(&params).view()).unwrap(),
        chain.log_probs[17],
        epsilon = 1e-10
    );

    let replay = sampler(3).sample(&factory, &prior, &init).unwrap();
    assert_eq!(chain.samples, replay.samples);
    assert_eq!(chain.log_probs, replay.log_probs);
}

#[test]
fn test_too_few_walkers() {
    let data = sin_data(12);
    let kernel = SquaredExponentialKernel::new(1);
    let factory = |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.01);
    let prior = LogPrior::build(kernel.registry(), &[], &[]).unwrap();
    let init = HyperParams::from_elem(kernel.registry().clone(), 1.);
    let sampler =
        HyperparameterSampler::new(HyperparameterSampler::params().n_walkers(Some(5))).unwrap();
    let res = sampler.sample(&factory, &prior, &init);
    assert!(matches!(res, Err(GpError::ConstraintError(_))));
}
