use std::collections::BTreeMap;
use std::sync::Arc;

use paired_comparison::{
    ChoiceModel, ExperimentLayout, GroupInferenceEngine, GroupModel, InferenceConfig, LayoutError,
    LearnStatus, LearningSchedule, PairedCompDataSet, PairedCompError, PairedCompResultSet,
    PairedCompTrial, ParameterShape, PopulationModel, PopulationPriorConfig, TrialStatistics,
};

fn layout() -> ExperimentLayout {
    ExperimentLayout::new(["Ref", "X", "Y"], ["Timbre"], ["Better", "Much better"])
        .with_test_factor("Level", ["Soft", "Loud"])
}

fn prior(layout: &ExperimentLayout) -> Arc<PopulationModel> {
    Arc::new(
        PopulationModel::initialize(
            ParameterShape::from_layout(layout),
            PopulationPriorConfig::default(),
            false,
        )
        .expect("valid prior"),
    )
}

fn subject_trials(n_subjects: usize) -> BTreeMap<String, Vec<PairedCompTrial>> {
    (0..n_subjects)
        .map(|s| {
            let trials = ["Soft", "Loud"]
                .iter()
                .flat_map(|level| {
                    [
                        PairedCompTrial::new("Ref", "X", 1).with_test_condition([*level]),
                        PairedCompTrial::new("X", "Y", -2).with_test_condition([*level]),
                        PairedCompTrial::new("Y", "Ref", 1).with_test_condition([*level]),
                    ]
                })
                .collect();
            (format!("s{s}"), trials)
        })
        .collect()
}

fn learn_group(schedule: LearningSchedule, n_subjects: usize) -> GroupModel {
    let layout = Arc::new(layout());
    let config = InferenceConfig {
        n_samples: 100,
        n_predictive_samples: 500,
        parallel: false,
        schedule,
        ..InferenceConfig::default()
    };
    GroupModel::learn(
        Arc::clone(&layout),
        "g",
        "Timbre",
        &subject_trials(n_subjects),
        ChoiceModel::Thurstone,
        prior(&layout),
        &config,
    )
    .expect("learning succeeds")
}

#[test]
fn iteration_cap_bounds_lower_bound_history() {
    let model = learn_group(
        LearningSchedule {
            min_iter: 1,
            min_step: f64::NEG_INFINITY,
            max_iter: Some(6),
        },
        3,
    );
    assert_eq!(model.lower_bounds().len(), 6);
    assert_eq!(model.status(), LearnStatus::MaxIterReached);
}

#[test]
fn single_subject_converges() {
    let schedule = LearningSchedule {
        min_iter: 2,
        min_step: 0.01,
        max_iter: Some(200),
    };
    let model = learn_group(schedule, 1);
    assert_eq!(model.status(), LearnStatus::Converged);
    assert!(model.lower_bounds().len() > schedule.min_iter);
    assert!(model.lower_bounds().len() < 200);
}

#[test]
fn single_trial_type_at_optimum_stops_after_one_window() {
    let layout = ExperimentLayout::new(["A", "B"], ["Timbre"], ["Better"]);
    let schedule = LearningSchedule {
        min_iter: 5,
        min_step: 0.01,
        max_iter: Some(100),
    };
    let config = InferenceConfig {
        n_samples: 100,
        parallel: false,
        schedule,
        ..InferenceConfig::default()
    };
    let trials = vec![PairedCompTrial::new("A", "B", 1)];
    let data = TrialStatistics::from_trials(&layout, &trials).expect("valid trials");
    let mut engine = GroupInferenceEngine::new(
        "g",
        "Timbre",
        ParameterShape::from_layout(&layout),
        vec![("s1".to_string(), data)],
        ChoiceModel::Thurstone,
        prior(&layout),
        &config,
    )
    .expect("engine builds");

    assert_eq!(engine.learn(|_, _| {}).expect("learning succeeds"), LearnStatus::Converged);
    let learned = engine.lower_bounds().len();
    assert!(learned > schedule.min_iter);

    let status = engine.refine(|_, _| {}).expect("refining succeeds");
    assert_eq!(status, LearnStatus::Converged);
    assert_eq!(engine.lower_bounds().len() - learned, schedule.min_iter + 1);
}

#[test]
fn predictive_models_respect_layout_shape() {
    let model = learn_group(LearningSchedule::default(), 2);
    let individual = model.pred_population_ind();
    let mean = model.pred_population_mean();

    let draws = individual.quality_samples();
    assert_eq!(draws.len(), 500);
    assert_eq!((draws[0].nrows(), draws[0].ncols()), (2, 3));
    assert_eq!(individual.cat_limit_samples().ncols(), 2);

    let individual_var = individual.marginals().variance();
    let mean_var = mean.marginals().variance();
    assert!(
        individual_var
            .iter()
            .zip(&mean_var)
            .all(|(ind, mean)| ind > mean)
    );
}

#[test]
fn data_errors_are_reported_before_learning() {
    let config = InferenceConfig {
        n_samples: 20,
        ..InferenceConfig::default()
    };
    let learn = |data: &PairedCompDataSet| {
        PairedCompResultSet::learn(data, ChoiceModel::Thurstone, false, &config)
    };

    let mut unknown_object = PairedCompDataSet::new(layout());
    unknown_object.add_trial(
        "g",
        "Timbre",
        "s1",
        PairedCompTrial::new("Ref", "Z", 1).with_test_condition(["Soft"]),
    );
    assert!(matches!(
        learn(&unknown_object),
        Err(PairedCompError::UnknownObject { label }) if label == "Z"
    ));

    let mut zero_response = PairedCompDataSet::new(layout());
    zero_response.add_trial(
        "g",
        "Timbre",
        "s1",
        PairedCompTrial::new("Ref", "X", 0).with_test_condition(["Soft"]),
    );
    assert!(matches!(
        learn(&zero_response),
        Err(PairedCompError::InvalidResponse { response: 0, .. })
    ));

    let mut missing_condition = PairedCompDataSet::new(layout());
    missing_condition.add_trial("g", "Timbre", "s1", PairedCompTrial::new("Ref", "X", 1));
    assert!(matches!(
        learn(&missing_condition),
        Err(PairedCompError::UnknownTestCondition { .. })
    ));

    let mut silent = PairedCompDataSet::new(layout());
    silent.add_subject_trials("g", "Timbre", "s1", Vec::new());
    assert!(matches!(
        learn(&silent),
        Err(PairedCompError::NoSubjects { .. })
    ));

    let single_object = PairedCompDataSet::new(ExperimentLayout::new(["Ref"], ["Timbre"], ["Better"]));
    assert_eq!(
        learn(&single_object).expect_err("layout is invalid"),
        PairedCompError::Layout(LayoutError::TooFewObjects { count: 1 })
    );
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut data = PairedCompDataSet::new(layout());
    data.add_trial(
        "g",
        "Timbre",
        "s1",
        PairedCompTrial::new("Ref", "X", 1).with_test_condition(["Soft"]),
    );
    let zero_samples = InferenceConfig {
        n_samples: 0,
        ..InferenceConfig::default()
    };
    assert!(matches!(
        PairedCompResultSet::learn(&data, ChoiceModel::Thurstone, false, &zero_samples),
        Err(PairedCompError::InvalidConfig(_))
    ));

    let short_cap = InferenceConfig {
        schedule: LearningSchedule {
            min_iter: 5,
            min_step: 0.01,
            max_iter: Some(5),
        },
        ..InferenceConfig::default()
    };
    assert!(matches!(
        PairedCompResultSet::learn(&data, ChoiceModel::Thurstone, false, &short_cap),
        Err(PairedCompError::Schedule(_))
    ));
}
