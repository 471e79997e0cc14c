use mgpi_gp::*;
use ndarray::{concatenate, Array, Array1, Array2, Axis};

fn sinx(x: &Array2<f64>) -> Array1<f64> {
    x.column(0).mapv(f64::sin)
}

fn main() {
    env_logger::init();
    let xt = Array::linspace(0., 2. * std::f64::consts::PI, 12).insert_axis(Axis(1));
    let data = TrainingSet::new(xt.clone(), sinx(&xt)).expect("valid training data");
    println!("Interpolate 'sin' at {}", xt.column(0));

    let kernel = SquaredExponentialKernel::new(1);
    let noise = 1e-3;
    let factory = |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), noise);
    let prior = LogPrior::build(kernel.registry(), &[Bound::new("length0", 0.1, 10.)], &[])
        .expect("valid prior");
    let init = HyperParams::from_elem(kernel.registry().clone(), 1.);

    let optimizer = HyperparameterOptimizer::new(HyperparameterOptimizer::params().seed(Some(42)))
        .expect("valid optimizer parameters");
    let best = optimizer
        .optimize(&factory, &prior, &init)
        .expect("optimization");
    println!("Best hyperparameters: {}", best.params);

    let gp = factory(&best.params).expect("GP fitting");
    let xtest = Array::linspace(0., 2. * std::f64::consts::PI, 25).insert_axis(Axis(1));
    let (mean, var) = gp.predict(&xtest).expect("prediction");
    let (dmean, _) = gp.predict_gradients(&xtest).expect("gradient prediction");

    println!("Prediction errors (x, err(x), sigma(x), err(dx))");
    println!(
        "{}",
        concatenate![
            Axis(1),
            xtest,
            (mean - sinx(&xtest)).insert_axis(Axis(1)),
            var.mapv(f64::sqrt).insert_axis(Axis(1)),
            dmean - xtest.mapv(f64::cos)
        ]
    );

    let sampler = HyperparameterSampler::new(
        HyperparameterSampler::params()
            .n_burnin(50)
            .n_samples(100)
            .seed(Some(42)),
    )
    .expect("valid sampler parameters");
    let chain = sampler
        .sample(&factory, &prior, &best.params)
        .expect("sampling");
    for name in chain.free_names.iter() {
        if let Some(values) = chain.column(name) {
            println!(
                "{name}: mean={:.3} std={:.3}",
                values.mean().unwrap_or(f64::NAN),
                values.std(0.)
            );
        }
    }
    println!(
        "Mean acceptance fraction: {:.3}",
        chain.mean_acceptance_fraction()
    );
}
