use crate::config::MD5_LEN;

pub type Digest = [u8; MD5_LEN];

/// What to do given the digests of the image file, of the configuration and
/// of the co-processor's flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// All three agree.
    RunExisting,
    /// File and configuration agree, flash holds something else.
    FlashFromFile,
    /// Flash matches the configuration but the file does not: the file is
    /// probably a bad upload. Keep what runs.
    RunExistingStaleFile,
    /// Flash matches the file but the configuration is out of date.
    AdoptFileDigest,
    /// Nothing agrees. Try to run whatever is in flash.
    BestEffort,
}

impl Reconciliation {
    /// `true` when the image already in flash is to be started as is.
    pub fn runs_existing(self) -> bool {
        self != Reconciliation::FlashFromFile
    }
}

pub fn reconcile(file: &Digest, config: &Digest, flash: &Digest) -> Reconciliation {
    if file == config {
        if config == flash {
            Reconciliation::RunExisting
        } else {
            Reconciliation::FlashFromFile
        }
    } else if config == flash {
        Reconciliation::RunExistingStaleFile
    } else if file == flash {
        Reconciliation::AdoptFileDigest
    } else {
        Reconciliation::BestEffort
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn reconciliation_table() {
    let a = [0xaa; MD5_LEN];
    let b = [0xbb; MD5_LEN];
    let c = [0xcc; MD5_LEN];

    assert_eq!(reconcile(&a, &a, &a), Reconciliation::RunExisting);
    assert_eq!(reconcile(&a, &a, &b), Reconciliation::FlashFromFile);
    assert_eq!(reconcile(&b, &a, &a), Reconciliation::RunExistingStaleFile);
    assert_eq!(reconcile(&a, &b, &a), Reconciliation::AdoptFileDigest);
    assert_eq!(reconcile(&a, &b, &c), Reconciliation::BestEffort);
}

#[test]
fn only_flash_from_file_replaces_the_image() {
    use Reconciliation::*;
    for verdict in [RunExisting, RunExistingStaleFile, AdoptFileDigest, BestEffort].iter() {
        assert!(verdict.runs_existing());
    }
    assert!(!FlashFromFile.runs_existing());
}
