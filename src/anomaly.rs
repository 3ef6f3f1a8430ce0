// 安全しきい値による異常判定
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//

/// 安全しきい値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub voltage_high: f64,
    pub voltage_low: f64,
    pub current_high: f64,
    pub power_high: f64,
}

/// しきい値判定。3条件のいずれかを超えたら異常とする。
/// 境界値ちょうど(==)は異常としない。
pub fn classify(voltage: f64, current: f64, power: f64, thresholds: &Thresholds) -> bool {
    voltage > thresholds.voltage_high
        || voltage < thresholds.voltage_low
        || current > thresholds.current_high
        || power > thresholds.power_high
}

#[cfg(test)]
const THRESHOLDS: Thresholds = Thresholds {
    voltage_high: 250.0,
    voltage_low: 200.0,
    current_high: 10.0,
    power_high: 2000.0,
};

#[test]
fn test1() {
    // 正常範囲
    assert!(!classify(235.0, 5.0, 1100.0, &THRESHOLDS));

    // 境界値ちょうどは異常としない
    assert!(!classify(250.0, 5.0, 1100.0, &THRESHOLDS));
    assert!(!classify(200.0, 5.0, 1100.0, &THRESHOLDS));
    assert!(!classify(235.0, 10.0, 1100.0, &THRESHOLDS));
    assert!(!classify(235.0, 5.0, 2000.0, &THRESHOLDS));

    // 境界値を超えたら異常
    assert!(classify(250.01, 5.0, 1100.0, &THRESHOLDS));
    assert!(classify(199.99, 5.0, 1100.0, &THRESHOLDS));
    assert!(classify(235.0, 10.01, 1100.0, &THRESHOLDS));
    assert!(classify(235.0, 5.0, 2000.01, &THRESHOLDS));
}

#[test]
fn test2() {
    // いずれかひとつで全体が異常
    assert!(classify(260.0, 0.0, 0.0, &THRESHOLDS));
    assert!(classify(235.0, 11.0, 1100.0, &THRESHOLDS));
    assert!(classify(235.0, 5.0, 2200.0, &THRESHOLDS));

    // 純粋関数なので同じ入力は同じ結果
    assert_eq!(
        classify(235.0, 5.0, 2200.0, &THRESHOLDS),
        classify(235.0, 5.0, 2200.0, &THRESHOLDS)
    );
}
