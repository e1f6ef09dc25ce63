use crate::metrics::{Build, BuildResult, JobSummary, Metric};

/// Truncating integer average of build durations; 0 when there are no builds.
fn average_duration<'a>(builds: impl Iterator<Item = &'a Build>) -> u64 {
    let (total, count) = builds.fold((0u64, 0u64), |(total, count), build| {
        (total + build.duration, count + 1)
    });

    if count == 0 {
        return 0;
    }

    total / count
}

fn count_with_result(metric: &Metric, result: BuildResult) -> usize {
    metric.builds.iter().filter(|b| b.result == result).count()
}

/// Build numbers in the same order as `metric.builds`.
pub fn build_numbers(metric: &Metric) -> Vec<u64> {
    metric.builds.iter().map(|b| b.number).collect()
}

pub fn success_builds(metric: &Metric) -> usize {
    count_with_result(metric, BuildResult::Success)
}

pub fn failed_builds(metric: &Metric) -> usize {
    count_with_result(metric, BuildResult::Failure)
}

pub fn average_build_duration_seconds(metric: &Metric) -> u64 {
    average_duration(metric.builds.iter())
}

pub fn average_success_build_duration_seconds(metric: &Metric) -> u64 {
    average_duration(
        metric
            .builds
            .iter()
            .filter(|b| b.result == BuildResult::Success),
    )
}

pub fn average_failed_build_duration_seconds(metric: &Metric) -> u64 {
    average_duration(
        metric
            .builds
            .iter()
            .filter(|b| b.result == BuildResult::Failure),
    )
}

/// Assembles the stored document for a metric.
///
/// Builds with an `Unknown` result count towards `builds_count` and the overall
/// average, but towards neither the success nor the failure figures.
pub fn summarize(metric: &Metric) -> JobSummary {
    JobSummary {
        job_name: metric.job.clone(),
        builds_count: metric.builds.len(),
        success_builds_count: success_builds(metric),
        failed_builds_count: failed_builds(metric),
        average_per_build_duration_seconds: average_build_duration_seconds(metric),
        average_per_success_build_duration_seconds: average_success_build_duration_seconds(
            metric,
        ),
        average_per_failed_build_duration_seconds: average_failed_build_duration_seconds(metric),
        build_numbers: build_numbers(metric),
    }
}
