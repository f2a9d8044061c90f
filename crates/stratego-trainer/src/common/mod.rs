pub mod io;

/// UTC の現在時刻（`2024-01-01T00:00:00Z` 形式）
pub fn utc_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
