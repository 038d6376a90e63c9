use paired_comparison::{
    ChoiceModel, ExperimentLayout, InferenceConfig, LearningSchedule, PairedCompDataSet,
    PairedCompResultSet, PairedCompTrial,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

const OBJECTS: [&str; 3] = ["Reference", "Codec A", "Codec B"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let layout = ExperimentLayout::new(OBJECTS, ["Preference"], ["Slightly better", "Better"]);
    let data = build_synthetic_data(layout, 8, 6);

    let config = InferenceConfig {
        n_samples: 300,
        n_predictive_samples: 3_000,
        schedule: LearningSchedule {
            max_iter: Some(40),
            ..LearningSchedule::default()
        },
        seed: 2_026,
        ..InferenceConfig::default()
    };

    let result = PairedCompResultSet::learn(&data, ChoiceModel::Thurstone, false, &config)?;
    println!(
        "Learned {} trials in {} groups",
        data.n_trials(),
        data.n_groups()
    );

    for (group, by_attribute) in result.models() {
        for (attribute, model) in by_attribute {
            println!(
                "\n{group} / {attribute}: {} subjects, {} iterations, {:?}",
                model.subjects().len(),
                model.lower_bounds().len(),
                model.status()
            );
            if let Some(bound) = model.lower_bounds().last() {
                println!("  final lower bound = {bound:.2}");
            }

            let predictive = model.pred_population_mean();
            let summary = predictive.quality_summary()?;
            for (object, stats) in OBJECTS.iter().zip(&summary.summaries[0]) {
                println!(
                    "  {object:<10} mean={:>6.3}, 95% CrI [{:>6.3}, {:>6.3}]",
                    stats.mean, stats.q025, stats.q975
                );
            }
            for (limit, stats) in predictive.cat_limit_summary()?.iter().enumerate() {
                println!("  limit {limit}: median={:>6.3}", stats.q50);
            }
        }
    }
    Ok(())
}

/// Two listener groups with slightly different preferences, simulated with a Thurstone observer.
fn build_synthetic_data(
    layout: ExperimentLayout,
    n_subjects: usize,
    n_replications: usize,
) -> PairedCompDataSet {
    let mut rng = StdRng::seed_from_u64(7);
    let mut data = PairedCompDataSet::new(layout);
    for (group, quality) in [("experts", [0.0, 0.8, 1.5]), ("naive", [0.0, 0.4, 0.6])] {
        for subject in 0..n_subjects {
            let offset: f64 = 0.3 * Distribution::<f64>::sample(&StandardNormal, &mut rng);
            for _ in 0..n_replications {
                for (a, b) in [(0, 1), (0, 2), (1, 2)] {
                    let shift = if b == 2 { offset } else { 0.0 };
                    let noise: f64 = StandardNormal.sample(&mut rng);
                    let decision = quality[b] - quality[a] + shift + noise;
                    let magnitude = if decision.abs() < 1.0 { 1 } else { 2 };
                    let response = if decision < 0.0 { -magnitude } else { magnitude };
                    data.add_trial(
                        group,
                        "Preference",
                        format!("{group}{subject:02}"),
                        PairedCompTrial::new(OBJECTS[a], OBJECTS[b], response),
                    );
                }
            }
        }
    }
    data
}
