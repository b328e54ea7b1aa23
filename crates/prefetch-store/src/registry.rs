//! Known archives and dataset member layouts.
//!
//! The registry is plain read-only data handed to the resolver, so tests and
//! config files can supply their own tables.

use std::collections::BTreeMap;
use std::path::PathBuf;

use prefetch_core::DatasetSplit;

/// Share-link prefix for the published archives.
pub const DEFAULT_BASE_URL: &str = "https://1sfu-my.sharepoint.com/:u:/g/personal/sshavara_sfu_ca/";

/// Where an archive can be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Remote {
        url: String,
        sha256: Option<String>,
    },
    Local(PathBuf),
}

/// Which member of an archive holds a given split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberLayout {
    /// One undifferentiated member, whatever the split.
    Single(String),
    /// `train.jsonl`, `dev.jsonl`, `test.jsonl` for the listed splits.
    PerSplit(Vec<DatasetSplit>),
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    archives: BTreeMap<String, ArchiveSource>,
    datasets: BTreeMap<String, MemberLayout>,
}

// (archive file name, share token)
const BUILTIN_ARCHIVES: &[(&str, &str)] = &[
    ("FACTOIDQA_oracle_varying.zip", "EaFkI0ecTM1As54ocMo5BFEBLBRsa7k1iWdQc3bpcrgEKA?e=afVrfM"),
    ("FACTOIDQA_spel_1000.zip", "EfdJnq020bJFrdBWX1wackIBA3pSfDgmrCByzQT4zcViNA?e=6crgde"),
    ("STRATEGYQA_spel_1000.zip", "EWgyN1g6jBxLk56KwecT_JABgF7RvUgiMlG7OWFk8t_u4g?e=8jVAm2"),
    ("EntityQuestions_spel_1000.zip", "EZZWyUI7LERAsyZbHXB7nZMB6tGYEfzc3c3EwIdT04H7mw?e=BPJgdQ"),
    ("FACTOIDQA_spel_300.zip", "EZQRBRVLoMNKt3UgSHV_grsBJjYSkC4J3dZmGuIQteJU5g?e=5cdBhW"),
    ("STRATEGYQA_spel_300.zip", "ESBFwjbNdjFAhOsGyHTEYaABni_Rw8jQhlv-ieyPPIChTA?e=OBYnFR"),
    ("EntityQuestions_spel_300.zip", "ETmxNl47QPhKvTj9QmbTfkMBkHeoAqa0eVi7mmtdpis8kQ?e=Jjd441"),
    ("FACTOIDQA_spel_100.zip", "EUWeCRoFFmFIuNrxcGzLTWsBMpz8F0vcoPA_PVXF4JSRHQ?e=R5gjBQ"),
    ("STRATEGYQA_spel_100.zip", "Ec9cgZkpoPZCsyeu3TdZdHcBZfNdT75U0p9ib-koJ0xNNQ?e=NX6Sim"),
    ("EntityQuestions_spel_100.zip", "EfV5sD_GeZRGg_FT5NB_GtkBbBJoaSDjfkDqORbQypzVZQ?e=8txeYd"),
    ("FACTOIDQA_spel_50.zip", "Ea8Q7Q1gJFVFp4qec5Hei44B-OQ0sm0NmGb3NtDav2pAcQ?e=jPyz8h"),
    ("STRATEGYQA_spel_50.zip", "EYRlB2OE8z9Hn1mta7auyMMB_ASPba4MrMNOX7KNHmEFMA?e=zcie0q"),
    ("EntityQuestions_spel_50.zip", "Ed16EwYMGw1OqFZcJlBkaWoB1IA5fdiUmb9byHsKmkRIXA?e=P1snjk"),
    ("EntityQuestions_bm25_100.zip", "EdpGpxLIy-NLkfvQ0eurplwBroLsQFsfQs_hjrN2FrJp9g?e=OocWX3"),
    ("STRATEGYQA_bm25_100.zip", "EVMmR908BepNssLfP8sFXacBbDFQHVpBUrr62MOtJYGVIQ?e=78Ahsv"),
    ("FACTOIDQA_bm25_100.zip", "EROATmeR6QNEvCARa8VlG2cBo7COMpnvTsOm6yHRRnkLFQ?e=5QnQTX"),
    ("FACTOIDQA_dpr_100.zip", "EU5_xn4t5GtBnt0ILQ0XvNoBegTeWSoVuCnZRJgmkDMQvQ?e=gDzAkQ"),
    ("STRATEGYQA_dpr_100.zip", "EW_na-RgHm1EgrHu3Mo8kDYBlUqG3rLnEqkgctHU8g5Xcw?e=gPJiXB"),
    ("EntityQuestions_dpr_100.zip", "ESQe7GXHCkdOkaXJ2ud12jMBYrHlo3wCGZssYVoS8ba6Yg?e=3QZqMs"),
    ("FACTOIDQA_ance_100.zip", "EbKI_eVgO4xBr_C0EXcwhb8B1AzsO8NwcD8YRXTneGzI3g?e=aXkRaj"),
    ("STRATEGYQA_ance_100.zip", "EVFRT42kD61BiEsu_SQyN0gBx2w42ecd0XdQhKOK6AC4KQ?e=FQT0gL"),
    ("EntityQuestions_ance_100.zip", "EYkXjrFO5JtDgBNjUWUHkR4BmRli974Upx3wO_dQ0vgHjA?e=h7oU3b"),
    ("EntityQuestions_dkrr_100.zip", "EYIL12DE74JOoyXbzR9MbpIB_m7Zp24BIXWT8w6GqLMgPg?e=t95PaG"),
    ("STRATEGYQA_dkrr_100.zip", "Eanm9hFnFSZAjZtQ5b0yuSIBYy9530L28XOesgxnS0RE5g?e=kKeQKn"),
    ("FACTOIDQA_dkrr_100.zip", "EVGtBTD4l7BGtMdPFSR4ubsBT3vsO_jpK21-xZRDRAUoaQ?e=PeKAhk"),
];

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Published archives and the benchmark datasets they cover.
    pub fn builtin() -> Self {
        Self::builtin_with_base_url(DEFAULT_BASE_URL)
    }

    pub fn builtin_with_base_url(base_url: &str) -> Self {
        let mut registry = Self::empty();
        for (name, token) in BUILTIN_ARCHIVES {
            registry.insert_archive(
                *name,
                ArchiveSource::Remote {
                    url: format!("{base_url}{token}&download=1"),
                    sha256: None,
                },
            );
        }
        registry.insert_dataset("FACTOIDQA", MemberLayout::Single("data.jsonl".into()));
        registry.insert_dataset("STRATEGYQA", MemberLayout::PerSplit(DatasetSplit::ALL.to_vec()));
        registry.insert_dataset(
            "EntityQuestions",
            MemberLayout::PerSplit(DatasetSplit::ALL.to_vec()),
        );
        registry
    }

    /// Add or replace an archive entry, keyed by archive file name.
    pub fn insert_archive(&mut self, file_name: impl Into<String>, source: ArchiveSource) {
        self.archives.insert(file_name.into(), source);
    }

    pub fn insert_dataset(&mut self, name: impl Into<String>, layout: MemberLayout) {
        self.datasets.insert(name.into(), layout);
    }

    pub fn with_archive(mut self, file_name: impl Into<String>, source: ArchiveSource) -> Self {
        self.insert_archive(file_name, source);
        self
    }

    pub fn with_dataset(mut self, name: impl Into<String>, layout: MemberLayout) -> Self {
        self.insert_dataset(name, layout);
        self
    }

    pub fn archive(&self, file_name: &str) -> Option<&ArchiveSource> {
        self.archives.get(file_name)
    }

    pub fn dataset(&self, name: &str) -> Option<&MemberLayout> {
        self.datasets.get(name)
    }

    pub fn archive_names(&self) -> impl Iterator<Item = &str> {
        self.archives.keys().map(String::as_str)
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }
}
