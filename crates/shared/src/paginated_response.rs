//! # ページネーション付きレスポンス
//!
//! limit/offset ベースのページネーションに対応した API レスポンス型。

use serde::{Deserialize, Serialize};

/// ページネーション付きレスポンス
///
/// `ApiResponse<T>` が単一データ用であるのに対し、
/// `PaginatedResponse<T>` はリスト + 件数情報のページネーション形式。
///
/// ## JSON 形式
///
/// ```json
/// {
///   "data": [...],
///   "total": 42,
///   "limit": 20,
///   "offset": 0
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data:   Vec<T>,
    /// フィルタ条件に一致する総件数（このページの件数ではない）
    pub total:  i64,
    pub limit:  i64,
    pub offset: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, limit: i64, offset: i64) -> Self {
        Self {
            data,
            total,
            limit,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_serializeを正しいjson形状にする() {
        let response = PaginatedResponse::new(vec![1, 2, 3], 10, 3, 0);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "data": [1, 2, 3],
                "total": 10,
                "limit": 3,
                "offset": 0
            })
        );
    }

    #[test]
    fn test_空ページもシリアライズできる() {
        let response: PaginatedResponse<i32> = PaginatedResponse::new(Vec::new(), 0, 20, 40);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["total"], 0);
    }
}
