//! 環境変数の収集と型付き読み出し。

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// EnvSource は `.env` ファイル・プロセス環境変数・明示的な上書き値を
/// 優先順位どおりにマージした変数集合を表す。
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `.env` 形式のファイルを取り込む。既に存在するキーは上書きしない。
    /// ファイルが存在しない場合は何もしない。
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => return Ok(()),
            Err(source) => {
                return Err(ConfigError::EnvFile {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        for item in iter {
            let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                path: path.to_path_buf(),
                source,
            })?;
            self.vars.entry(key).or_insert(value);
        }
        Ok(())
    }

    /// 値を設定する。既存の値は上書きする。
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// 複数の値をまとめて上書きする。
    pub fn extend<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// 空でない値のみを返す。
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// 値を型 T として解析する。未設定・空文字は None。解析失敗はエラー。
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.non_empty(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::InvalidVar {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// 指定プレフィックスを持つ変数を、プレフィックスを除いた小文字キーで列挙する。
    /// 例: `CONSUMERSGROUPID_FPL_TEAMS` → `fpl_teams`
    pub fn with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        let mut found: Vec<(String, String)> = self
            .vars
            .iter()
            .filter_map(|(key, value)| {
                let suffix = key.strip_prefix(prefix)?;
                if suffix.is_empty() {
                    return None;
                }
                Some((suffix.to_ascii_lowercase(), value.clone()))
            })
            .collect();
        found.sort();
        found
    }
}
