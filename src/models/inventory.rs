//! Parser output: the test inventory of one checkout.
//!
//! These types mirror the JSON document emitted by the scanner. They are
//! transient values; persistence happens in `db::inventory`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub files: Vec<TestFile>,
}

impl Inventory {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of suites the inventory will persist as, implicit suites included.
    pub fn suite_count(&self) -> usize {
        self.files
            .iter()
            .map(|f| {
                let implicit = usize::from(!f.tests.is_empty());
                f.suites.iter().map(TestSuite::suite_count).sum::<usize>() + implicit
            })
            .sum()
    }

    pub fn test_count(&self) -> usize {
        self.files
            .iter()
            .map(|f| f.tests.len() + f.suites.iter().map(TestSuite::test_count).sum::<usize>())
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFile {
    pub path: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub suites: Vec<TestSuite>,
    /// File-level tests not wrapped in any suite.
    #[serde(default)]
    pub tests: Vec<Test>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub suites: Vec<TestSuite>,
    #[serde(default)]
    pub tests: Vec<Test>,
}

impl TestSuite {
    fn suite_count(&self) -> usize {
        1 + self.suites.iter().map(Self::suite_count).sum::<usize>()
    }

    fn test_count(&self) -> usize {
        self.tests.len() + self.suites.iter().map(Self::test_count).sum::<usize>()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub status: TestStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub start_line: i32,
    #[serde(default)]
    pub end_line: i32,
}

impl Location {
    pub fn at(line: i32) -> Self {
        Self {
            start_line: line,
            end_line: line,
        }
    }
}

/// Status as reported by the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Active,
    Focused,
    Skipped,
    Pending,
    Fixme,
    Todo,
    Xfail,
    #[serde(other)]
    Unknown,
}

/// Status stored on a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestCaseStatus {
    Active,
    Skipped,
    Todo,
}

impl TestCaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Skipped => "skipped",
            Self::Todo => "todo",
        }
    }
}

impl From<TestStatus> for TestCaseStatus {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Skipped => Self::Skipped,
            TestStatus::Pending | TestStatus::Fixme | TestStatus::Todo | TestStatus::Xfail => {
                Self::Todo
            }
            _ => Self::Active,
        }
    }
}

impl std::fmt::Display for TestCaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
