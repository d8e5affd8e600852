//! # 値オブジェクト
//!
//! 識別子を持たない不変の値型。

define_validated_string! {
    /// スケジュール名
    ///
    /// trim 後に空でないこと、100 文字以内であることを保証する。
    pub struct ScheduleName {
        label: "スケジュール名",
        max_length: 100,
    }
}
