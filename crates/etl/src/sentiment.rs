//! 情感分析模块
//!
//! 基于词典的极性打分：正面强度 `pos` 与负面强度 `neg` 都在 [0, 1] 内，
//! 最终分数为 `pos - neg`，范围 [-1, 1]。

use crate::types::{ETLError, ETLResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 否定词会把其后三个词以内的情感值乘以该系数
const NEGATION_SCALAR: f64 = -0.74;
const NEGATION_WINDOW: usize = 3;

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nobody", "nothing", "neither", "nor", "nowhere",
    "cannot", "without", "aint", "dont", "doesnt", "didnt", "isnt", "wasnt", "wont",
];

/// 公开发布的 VADER 词典
pub const VADER_LEXICON_URL: &str =
    "https://raw.githubusercontent.com/cjhutto/vaderSentiment/master/vaderSentiment/vader_lexicon.txt";

static ANALYZER: OnceLock<SentimentAnalyzer> = OnceLock::new();

/// 词典来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LexiconSource {
    /// 内置小词表，仅用于离线环境
    Builtin,
    /// 本地 VADER 格式文件
    File(PathBuf),
    /// 首次使用时下载并缓存到本地
    Remote { url: String, cache_path: PathBuf },
}

impl LexiconSource {
    /// 默认缓存位置：系统临时目录下的 `vader_lexicon.txt`
    pub fn default_cache_path() -> PathBuf {
        std::env::temp_dir().join("vader_lexicon.txt")
    }
}

impl Default for LexiconSource {
    fn default() -> Self {
        LexiconSource::Remote {
            url: VADER_LEXICON_URL.to_string(),
            cache_path: Self::default_cache_path(),
        }
    }
}

/// 词 -> 情感值，情感值范围约 [-4, 4]
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    valences: HashMap<String, f64>,
}

impl Lexicon {
    pub fn builtin() -> Self {
        let entries = [
            // 正面
            ("good", 1.9),
            ("great", 3.1),
            ("excellent", 2.7),
            ("best", 3.2),
            ("better", 1.9),
            ("win", 2.8),
            ("wins", 2.7),
            ("won", 2.7),
            ("success", 2.7),
            ("successful", 2.8),
            ("happy", 2.7),
            ("hope", 1.9),
            ("love", 3.2),
            ("like", 1.5),
            ("positive", 2.6),
            ("strong", 2.3),
            ("gain", 2.4),
            ("gains", 1.8),
            ("growth", 1.6),
            ("profit", 1.9),
            ("rally", 1.8),
            ("rallies", 1.8),
            ("surge", 1.6),
            ("surges", 1.6),
            ("boost", 1.7),
            ("record", 0.9),
            ("rise", 1.2),
            ("rises", 1.2),
            ("recover", 1.8),
            ("recovery", 1.4),
            ("agree", 1.5),
            ("agreement", 2.2),
            ("support", 1.7),
            ("safe", 1.9),
            ("peace", 2.5),
            ("welcome", 2.0),
            ("improve", 1.9),
            ("improves", 1.9),
            ("breakthrough", 2.3),
            ("celebrate", 2.7),
            // 负面
            ("bad", -2.5),
            ("worse", -2.1),
            ("worst", -3.1),
            ("fail", -2.5),
            ("fails", -1.8),
            ("failure", -2.3),
            ("loss", -1.3),
            ("losses", -1.7),
            ("lose", -1.7),
            ("crash", -1.7),
            ("crisis", -3.1),
            ("plunge", -2.0),
            ("plunges", -2.0),
            ("fall", -0.9),
            ("falls", -0.9),
            ("drop", -1.1),
            ("decline", -1.5),
            ("fear", -2.2),
            ("fears", -1.8),
            ("panic", -2.3),
            ("war", -2.9),
            ("attack", -2.1),
            ("killed", -3.5),
            ("kill", -3.7),
            ("dead", -3.3),
            ("death", -2.9),
            ("violence", -3.1),
            ("threat", -2.4),
            ("warning", -1.4),
            ("risk", -1.1),
            ("concern", -1.0),
            ("protest", -1.0),
            ("scandal", -1.9),
            ("fraud", -2.8),
            ("terrible", -2.1),
            ("sad", -2.1),
            ("angry", -2.3),
            ("hate", -2.7),
            ("weak", -1.9),
            ("recession", -2.0),
            ("disaster", -3.1),
        ];

        Self {
            valences: entries
                .iter()
                .map(|(word, valence)| (word.to_string(), *valence))
                .collect(),
        }
    }

    /// 解析 VADER 格式词典：`word<TAB>mean<TAB>...`，无法解析的行跳过
    pub fn parse(content: &str) -> ETLResult<Self> {
        let valences: HashMap<String, f64> = content
            .lines()
            .filter_map(|line| {
                let mut fields = line.split('\t');
                let word = fields.next()?.trim();
                let valence = fields.next()?.trim().parse::<f64>().ok()?;
                if word.is_empty() {
                    return None;
                }
                Some((word.to_lowercase(), valence))
            })
            .collect();

        if valences.is_empty() {
            return Err(ETLError::LexiconUnavailable(
                "lexicon contains no entries".to_string(),
            ));
        }

        Ok(Self { valences })
    }

    pub async fn from_file(path: &Path) -> ETLResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ETLError::LexiconUnavailable(format!("{}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// 缓存存在则直接读取，否则下载后写入缓存
    pub async fn provision(url: &str, cache_path: &Path) -> ETLResult<Self> {
        if tokio::fs::try_exists(cache_path).await.unwrap_or(false) {
            tracing::debug!("Loading cached lexicon from {}", cache_path.display());
            return Self::from_file(cache_path).await;
        }

        tracing::info!("Downloading sentiment lexicon from {}", url);
        let content = reqwest::get(url)
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ETLError::LexiconUnavailable(e.to_string()))?
            .text()
            .await
            .map_err(|e| ETLError::LexiconUnavailable(e.to_string()))?;

        let lexicon = Self::parse(&content)?;

        if let Some(parent) = cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(cache_path, content.as_bytes()).await?;

        Ok(lexicon)
    }

    pub async fn load(source: &LexiconSource) -> ETLResult<Self> {
        match source {
            LexiconSource::Builtin => Ok(Self::builtin()),
            LexiconSource::File(path) => Self::from_file(path).await,
            LexiconSource::Remote { url, cache_path } => Self::provision(url, cache_path).await,
        }
    }

    pub fn valence(&self, word: &str) -> Option<f64> {
        self.valences.get(word).copied()
    }

    pub fn len(&self) -> usize {
        self.valences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valences.is_empty()
    }
}

/// 正面、负面、中性占比，三者之和为 1（空文本时全为 0）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolarityScores {
    pub pos: f64,
    pub neg: f64,
    pub neu: f64,
}

/// 情感分析器
#[derive(Debug, Clone)]
pub struct SentimentAnalyzer {
    lexicon: Lexicon,
}

impl SentimentAnalyzer {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    pub fn polarity_scores(&self, text: &str) -> PolarityScores {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|word| !word.is_empty())
            .collect();

        let mut positive_sum = 0.0;
        let mut negative_sum = 0.0;
        let mut neutral_count = 0.0;

        for (i, token) in tokens.iter().enumerate() {
            let Some(mut valence) = self.lexicon.valence(token) else {
                neutral_count += 1.0;
                continue;
            };

            if is_negated(&tokens[i.saturating_sub(NEGATION_WINDOW)..i]) {
                valence *= NEGATION_SCALAR;
            }

            if valence > 0.0 {
                positive_sum += valence + 1.0;
            } else if valence < 0.0 {
                negative_sum += valence - 1.0;
            } else {
                neutral_count += 1.0;
            }
        }

        let total = positive_sum + negative_sum.abs() + neutral_count;
        if total <= 0.0 {
            return PolarityScores::default();
        }

        PolarityScores {
            pos: positive_sum / total,
            neg: negative_sum.abs() / total,
            neu: neutral_count / total,
        }
    }

    /// 情感分数 [-1, 1]，-1 完全负面，1 完全正面
    pub fn score(&self, text: &str) -> f64 {
        let scores = self.polarity_scores(text);
        scores.pos - scores.neg
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }
}

fn is_negated(preceding: &[&str]) -> bool {
    preceding
        .iter()
        .any(|word| NEGATIONS.contains(word) || word.ends_with("n't"))
}

/// 确保进程级分析器已初始化，重复调用返回同一个实例。
///
/// 首次成功的初始化生效，之后传入的 `source` 不再使用。
pub async fn ensure_initialized(source: &LexiconSource) -> ETLResult<&'static SentimentAnalyzer> {
    initialize_in(&ANALYZER, source).await
}

/// 加载失败时 `cell` 保持为空，下次调用会重试
pub(crate) async fn initialize_in<'a>(
    cell: &'a OnceLock<SentimentAnalyzer>,
    source: &LexiconSource,
) -> ETLResult<&'a SentimentAnalyzer> {
    if let Some(analyzer) = cell.get() {
        return Ok(analyzer);
    }

    let lexicon = Lexicon::load(source).await?;
    tracing::info!("Sentiment lexicon ready with {} entries", lexicon.len());

    Ok(cell.get_or_init(|| SentimentAnalyzer::new(lexicon)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> SentimentAnalyzer {
        SentimentAnalyzer::new(Lexicon::builtin())
    }

    #[test]
    fn test_positive_headline() {
        let score = analyzer().score("Markets rally on good news");
        assert!(score > 0.0, "score = {}", score);
    }

    #[test]
    fn test_negative_headline() {
        let score = analyzer().score("Crisis deepens as markets crash amid war fears");
        assert!(score < 0.0, "score = {}", score);
    }

    #[test]
    fn test_empty_text_is_neutral() {
        let analyzer = analyzer();
        assert_eq!(analyzer.score(""), 0.0);
        assert_eq!(analyzer.score("   ...  "), 0.0);
        assert_eq!(analyzer.score("the cat sat on the mat"), 0.0);
    }

    #[test]
    fn test_negation_flips_polarity() {
        let analyzer = analyzer();
        assert!(analyzer.score("this is good") > 0.0);
        assert!(analyzer.score("this is not good") < 0.0);
        assert!(analyzer.score("it isn't bad at all") > 0.0);
    }

    #[test]
    fn test_scores_stay_in_range() {
        let analyzer = analyzer();
        let texts = [
            "great great great great",
            "kill kill kill kill kill",
            "not bad not terrible never worse",
            "Best excellent love win success, happy happy!",
            "war crisis disaster killed dead death",
            "a",
            "good bad good bad",
        ];

        for text in texts {
            let scores = analyzer.polarity_scores(text);
            assert!((0.0..=1.0).contains(&scores.pos));
            assert!((0.0..=1.0).contains(&scores.neg));
            let score = analyzer.score(text);
            assert!((-1.0..=1.0).contains(&score), "{} -> {}", text, score);
        }

        assert!((analyzer.score("great great great great") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_vader_format() {
        let content = "good\t1.9\t0.9434\t[2, 1, 2]\nbad\t-2.5\t0.67082\t[-3, -2]\nbroken line\n";
        let lexicon = Lexicon::parse(content).unwrap();
        assert_eq!(lexicon.len(), 2);
        assert_eq!(lexicon.valence("bad"), Some(-2.5));
        assert!(Lexicon::parse("nothing here").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vader_lexicon.txt");
        std::fs::write(&path, "hooray\t2.4\t0.5\t[]\n").unwrap();

        let lexicon = Lexicon::load(&LexiconSource::File(path)).await.unwrap();
        assert_eq!(lexicon.valence("hooray"), Some(2.4));

        let missing = Lexicon::load(&LexiconSource::File(dir.path().join("nope.txt"))).await;
        assert!(matches!(missing, Err(ETLError::LexiconUnavailable(_))));
    }

    #[tokio::test]
    async fn test_remote_uses_cache_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache").join("vader_lexicon.txt");
        std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
        std::fs::write(&cache_path, "cached\t1.0\t0.1\t[]\n").unwrap();

        let source = LexiconSource::Remote {
            url: "http://127.0.0.1:9/unreachable".to_string(),
            cache_path,
        };
        let lexicon = Lexicon::load(&source).await.unwrap();
        assert_eq!(lexicon.valence("cached"), Some(1.0));
    }

    #[tokio::test]
    async fn test_ensure_initialized_is_idempotent() {
        let first = ensure_initialized(&LexiconSource::Builtin).await.unwrap();
        let second = ensure_initialized(&LexiconSource::Builtin).await.unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(first.score("good news") > 0.0);
    }

    #[test]
    fn test_default_source_is_vader_download() {
        match LexiconSource::default() {
            LexiconSource::Remote { url, cache_path } => {
                assert_eq!(url, VADER_LEXICON_URL);
                assert!(url.ends_with("vader_lexicon.txt"));
                assert!(cache_path.starts_with(std::env::temp_dir()));
            }
            other => panic!("unexpected default lexicon source: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_from_cached_download() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("vader_lexicon.txt");
        let source = LexiconSource::Remote {
            url: "http://127.0.0.1:9/vader_lexicon.txt".to_string(),
            cache_path: cache_path.clone(),
        };
        let cell = OnceLock::new();

        // 既无缓存也无法下载：返回错误且不占用单例
        let missing = initialize_in(&cell, &source).await;
        assert!(matches!(missing, Err(ETLError::LexiconUnavailable(_))));
        assert!(cell.get().is_none());

        std::fs::write(&cache_path, "rally\t2.0\t0.5\t[]\nslump\t-2.0\t0.5\t[]\n").unwrap();

        let first = initialize_in(&cell, &source).await.unwrap();
        assert_eq!(first.lexicon().len(), 2);
        assert!(first.score("stocks rally") > 0.0);
        assert!(first.score("stocks slump") < 0.0);

        let second = initialize_in(&cell, &LexiconSource::Builtin).await.unwrap();
        assert!(std::ptr::eq(first, second));
    }
}
