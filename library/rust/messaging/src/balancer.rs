use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// LeastBytesBalancer はこれまでに送ったバイト数が最も少ないパーティションを選ぶ。
///
/// 同数の場合は番号の小さいパーティションを選ぶ。キーは振り分けに使わない。
#[derive(Debug, Default)]
pub struct LeastBytesBalancer {
    loads: Mutex<HashMap<String, Vec<u64>>>,
}

impl LeastBytesBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 送信先パーティションを選び、bytes を加算する。
    pub fn select(&self, topic: &str, partitions: u32, bytes: usize) -> i32 {
        let mut loads = self.loads.lock().unwrap_or_else(PoisonError::into_inner);
        let counters = loads.entry(topic.to_string()).or_default();
        counters.resize(partitions.max(1) as usize, 0);

        let mut selected = 0;
        for (index, load) in counters.iter().enumerate() {
            if *load < counters[selected] {
                selected = index;
            }
        }
        counters[selected] = counters[selected].saturating_add(bytes as u64);
        i32::try_from(selected).unwrap_or(0)
    }

    /// トピックのパーティションごとの累計バイト数。
    pub fn loads(&self, topic: &str) -> Vec<u64> {
        let loads = self.loads.lock().unwrap_or_else(PoisonError::into_inner);
        loads.get(topic).cloned().unwrap_or_default()
    }
}
