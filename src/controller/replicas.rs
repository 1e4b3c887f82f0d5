/// Replicas a release should run for a capacity percentage
///
/// Rounds up so a non-zero percentage never drops the only replica:
/// - `percent == 0` gives 0
/// - `percent == 100` gives `total_replicas`
/// - anything in between gives `ceil(total_replicas * percent / 100)`
///
/// Out-of-range inputs are clamped (negative totals count as 0, percentages
/// to [0, 100]).
///
/// # Examples
/// ```
/// # use shipper::controller::replicas::calculate_desired_replica_count;
/// assert_eq!(calculate_desired_replica_count(4, 50), 2);
/// assert_eq!(calculate_desired_replica_count(3, 50), 2);
/// assert_eq!(calculate_desired_replica_count(10, 1), 1);
/// ```
pub fn calculate_desired_replica_count(total_replicas: i32, percent: i32) -> i32 {
    let total = total_replicas.max(0);
    match percent.clamp(0, 100) {
        0 => 0,
        100 => total,
        p => ((total as f64 * p as f64) / 100.0).ceil() as i32,
    }
}
