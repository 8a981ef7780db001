//! Application constants for the grade importer
//!
//! This module contains the header vocabulary used by the field mapper,
//! default thresholds, and the tunable defaults used throughout the
//! import pipeline.
//!
//! All header patterns are stored in their normalized form (see
//! `field_mapper::normalize`): lowercase, full-width folded, with whitespace
//! and punctuation removed.

// =============================================================================
// Subject Vocabulary
// =============================================================================

/// Canonical subject keys paired with their normalized header aliases
///
/// The first alias of each entry is the display name used in long-form records.
pub const SUBJECT_ALIASES: &[(&str, &[&str])] = &[
    ("chinese", &["语文", "chinese", "yuwen"]),
    ("math", &["数学", "math", "maths", "mathematics", "shuxue"]),
    ("english", &["英语", "english", "yingyu"]),
    ("physics", &["物理", "physics", "wuli"]),
    ("chemistry", &["化学", "chemistry", "huaxue"]),
    ("biology", &["生物", "biology", "shengwu"]),
    (
        "politics",
        &["政治", "道法", "道德与法治", "思政", "思想政治", "politics"],
    ),
    ("history", &["历史", "history", "lishi"]),
    ("geography", &["地理", "geography", "dili"]),
    (
        "total",
        &["总分", "总成绩", "合计", "总计", "全科总分", "total", "totalscore"],
    ),
];

/// Single-character subject abbreviations
///
/// These only match when the whole header is the abbreviation, optionally
/// followed by exactly one attribute token ("语班名", "总等级").
pub const SUBJECT_ABBREVIATIONS: &[(&str, &str)] = &[
    ("chinese", "语"),
    ("math", "数"),
    ("english", "英"),
    ("physics", "物"),
    ("chemistry", "化"),
    ("biology", "生"),
    ("politics", "政"),
    ("history", "史"),
    ("geography", "地"),
    ("total", "总"),
];

/// Extra contains-patterns for total-grade headers that do not embed a total alias
pub const TOTAL_GRADE_PATTERNS: &[&str] = &["综合等级", "总等级", "totalgrade"];

/// Subjects whose full paper is scored out of 150 rather than 100
pub const LONG_PAPER_SUBJECTS: &[&str] = &["chinese", "math", "english"];

// =============================================================================
// Attribute Vocabulary
// =============================================================================

/// Tokens marking a class rank column
pub const CLASS_RANK_TOKENS: &[&str] = &[
    "班级排名",
    "班级名次",
    "班内排名",
    "班排名",
    "班排",
    "班名",
    "班次",
    "classrank",
    "rankinclass",
];

/// Tokens marking a grade-wide rank column (school rank folds in here)
pub const GRADE_RANK_TOKENS: &[&str] = &[
    "年级排名",
    "年级名次",
    "年排名",
    "年排",
    "级排名",
    "级排",
    "级名",
    "级次",
    "学校排名",
    "全校排名",
    "校排名",
    "校排",
    "校名",
    "graderank",
    "rankingrade",
    "schoolrank",
];

/// Tokens marking a letter-grade column
pub const GRADE_LEVEL_TOKENS: &[&str] = &["等级", "级别", "等第", "档次", "评级", "grade", "level"];

/// Tokens marking a score column
pub const SCORE_TOKENS: &[&str] = &["分数", "成绩", "得分", "原始分", "score"];

/// Bare rank headers, matched exactly and read as class rank
pub const GENERIC_RANK_HEADERS: &[&str] = &["排名", "名次", "排序", "rank", "ranking"];

/// Header fragments that disqualify a header from being a plain total score
pub const TOTAL_SCORE_PENALTY_TOKENS: &[&str] = &["班", "级", "校", "排名", "等级", "名次"];

// =============================================================================
// Identity And Exam Vocabulary
// =============================================================================

/// Student id headers matched exactly
pub const STUDENT_ID_EXACT: &[&str] = &[
    "学号",
    "考号",
    "准考证号",
    "学籍号",
    "考生号",
    "学生编号",
    "学生学号",
    "学生id",
    "studentid",
    "studentno",
    "studentnumber",
    "sid",
    "id",
    "编号",
];

/// Student id fragments matched as prefix, suffix, or substring
pub const STUDENT_ID_AFFIX: &[&str] = &["准考证号", "学籍号", "学号", "考号", "studentid"];

pub const NAME_EXACT: &[&str] = &[
    "姓名",
    "学生姓名",
    "考生姓名",
    "名字",
    "学生",
    "name",
    "studentname",
];

pub const NAME_AFFIX: &[&str] = &["姓名", "studentname"];

pub const CLASS_EXACT: &[&str] = &[
    "班级",
    "班别",
    "行政班",
    "所在班级",
    "班级名称",
    "班级编号",
    "班",
    "class",
    "classname",
    "classid",
];

pub const CLASS_AFFIX: &[&str] = &["行政班", "班级", "classname"];

pub const EXAM_TITLE_EXACT: &[&str] = &["考试名称", "考试标题", "考试", "测试名称", "exam", "examname", "examtitle"];

pub const EXAM_TYPE_EXACT: &[&str] = &["考试类型", "考试类别", "类型", "examtype"];

pub const EXAM_DATE_EXACT: &[&str] = &["考试日期", "考试时间", "日期", "时间", "examdate", "date"];

/// Headers naming the subject of a long-format row
pub const SUBJECT_COLUMN_EXACT: &[&str] = &["科目", "科目名称", "学科", "课程", "subject", "course"];

// =============================================================================
// Confidence Levels And Thresholds
// =============================================================================

/// Whole-header match against a pattern
pub const EXACT_MATCH_CONFIDENCE: f64 = 1.0;

/// Pattern found at the start or end of the header
pub const AFFIX_MATCH_CONFIDENCE: f64 = 0.95;

/// Pattern found inside the header
pub const CONTAINS_MATCH_CONFIDENCE: f64 = 0.9;

/// Single-character abbreviation match
pub const ABBREVIATION_MATCH_CONFIDENCE: f64 = 0.8;

/// Local mappings at or above this confidence win over assistant suggestions
pub const STRONG_LOCAL_CONFIDENCE: f64 = 0.95;

/// Aggregate mapping confidence below which the assistant is consulted
pub const DEFAULT_ASSISTANT_THRESHOLD: f64 = 0.7;

/// Default time to wait for the mapping assistant
pub const DEFAULT_ASSISTANT_TIMEOUT_SECS: u64 = 10;

/// Minimum combined similarity for a fuzzy identity match
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

/// Relative weight of name similarity in fuzzy identity confidence
pub const FUZZY_NAME_WEIGHT: f64 = 0.7;

/// Relative weight of class similarity in fuzzy identity confidence
pub const FUZZY_CLASS_WEIGHT: f64 = 0.3;

/// Subject score column count above which a table is read as wide
pub const DEFAULT_WIDE_SUBJECT_THRESHOLD: usize = 2;

/// Rows sampled for structure detection and unknown-field previews
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Distinct values kept per unmapped column preview
pub const UNKNOWN_FIELD_PREVIEW_VALUES: usize = 5;

// =============================================================================
// Import Defaults
// =============================================================================

pub const DEFAULT_BATCH_SIZE: usize = 50;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum score for subjects not listed in `LONG_PAPER_SUBJECTS`
pub const DEFAULT_SUBJECT_MAX_SCORE: f64 = 100.0;

pub const LONG_PAPER_MAX_SCORE: f64 = 150.0;

pub const DEFAULT_TOTAL_MAX_SCORE: f64 = 1000.0;

/// Cell values treated as an absent value rather than a parse failure
pub const MISSING_VALUE_MARKERS: &[&str] = &[
    "", "-", "--", "—", "/", "缺考", "缺", "无", "n/a", "na", "null", "none",
];

/// Prefix of identifiers minted for students with no id in the source
pub const MINTED_ID_PREFIX: &str = "auto_";

/// Namespace for deterministic UUIDv5 student id minting
pub const MINTED_ID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_u128(0x6b1f_3c2e_9a4d_4e57_8c61_2f0d_b7a9_e513);

pub const DEFAULT_LEVEL_CONFIG_ID: &str = "default";

pub const NINE_TIER_LEVEL_CONFIG_ID: &str = "nine-tier";

pub const DEFAULT_LEVEL_CACHE_TTL_SECS: u64 = 300;

pub const DEFAULT_MAPPING_MEMORY_TTL_SECS: u64 = 86_400;

/// Supported source file extensions
pub const SOURCE_EXTENSIONS: &[&str] = &["csv", "txt", "xlsx", "xlsm", "xls", "ods"];

/// Exam type keywords recognised in file names, with their canonical label
pub const EXAM_TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("月考", "monthly"),
    ("期中", "midterm"),
    ("期末", "final"),
    ("模拟", "mock"),
    ("模考", "mock"),
    ("一模", "mock"),
    ("二模", "mock"),
    ("联考", "joint"),
    ("单元", "unit"),
];

// =============================================================================
// Persistent State Layout
// =============================================================================

pub const APP_DIR_NAME: &str = "grade-importer";

pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const TASKS_DIR_NAME: &str = "tasks";

pub const LEVELS_DIR_NAME: &str = "levels";

pub const IDENTITIES_FILE_NAME: &str = "identities.json";

pub const GRADES_DIR_NAME: &str = "grades";

/// Look up the score ceiling for a subject key
pub fn max_score_for(subject_key: &str) -> f64 {
    if subject_key == "total" {
        DEFAULT_TOTAL_MAX_SCORE
    } else if LONG_PAPER_SUBJECTS.contains(&subject_key) {
        LONG_PAPER_MAX_SCORE
    } else {
        DEFAULT_SUBJECT_MAX_SCORE
    }
}

/// Check whether a normalized cell value denotes an absent value
pub fn is_missing_marker(normalized: &str) -> bool {
    MISSING_VALUE_MARKERS.contains(&normalized)
}
