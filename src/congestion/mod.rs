pub mod branches;
pub mod inference;
pub mod probe_index;
pub mod score;

pub use branches::{find_branches, Branch};
pub use probe_index::{prepare_probe_index, ProbeIndex};
pub use score::{accumulate, accumulate_file, normalize, ChangeFile, ChangeRecord};

/// Width of a scoring bin, in seconds.
pub const BIN: i64 = 600;
/// Minimum normalized per-bin score for a link to be considered congested.
pub const LINK_THRESHOLD: f64 = 0.5;
/// Minimum normalized per-bin score for a node to be considered congested.
pub const NODE_THRESHOLD: f64 = 0.5;
/// Change-detection column consumed from the RTT analysis files.
pub const CHANGE_METHOD: &str = "cpt_poisson&MBIC";

/// Parameters of one congestion run. The interval `[begin, stop]` limits
/// which change records are consumed and which bins are inferred.
#[derive(Debug, Clone)]
pub struct ScoreParams {
    pub method: String,
    pub bin_size: i64,
    pub begin: i64,
    pub stop: i64,
    pub link_threshold: f64,
    pub node_threshold: f64,
}

impl ScoreParams {
    pub fn new(begin: i64, stop: i64) -> ScoreParams {
        ScoreParams {
            method: CHANGE_METHOD.to_owned(),
            bin_size: BIN,
            begin,
            stop,
            link_threshold: LINK_THRESHOLD,
            node_threshold: NODE_THRESHOLD,
        }
    }

    pub fn bin_of(&self, t: i64) -> i64 {
        (t / self.bin_size) * self.bin_size
    }

    /// Bin starts covering `[begin, stop]`, in ascending order.
    pub fn bins(&self) -> impl Iterator<Item = i64> {
        let first = self.bin_of(self.begin);
        let past_last = (self.stop / self.bin_size + 1) * self.bin_size;
        (first..past_last).step_by(self.bin_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_cover_the_interval_inclusive() {
        let params = ScoreParams::new(650, 1850);
        assert_eq!(params.bins().collect::<Vec<_>>(), vec![600, 1200, 1800]);
    }

    #[test]
    fn bin_of_floors_to_bin_start() {
        let params = ScoreParams::new(0, 0);
        assert_eq!(params.bin_of(0), 0);
        assert_eq!(params.bin_of(599), 0);
        assert_eq!(params.bin_of(600), 600);
        assert_eq!(params.bin_of(1199), 600);
    }
}
