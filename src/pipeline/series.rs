use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{month_start, next_month, previous_month, DistrictCode, MonthlySeriesPoint};

/// One district's contiguous monthly counts, gaps filled with zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictSeries {
    pub district_code: DistrictCode,
    /// Month of `values[0]`
    pub start: NaiveDate,
    pub values: Vec<u64>,
}

impl DistrictSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Month of the last value
    pub fn end(&self) -> NaiveDate {
        (1..self.values.len()).fold(self.start, |m, _| next_month(m))
    }

    /// (month, count) pairs in order
    pub fn points(&self) -> Vec<(NaiveDate, u64)> {
        let mut month = self.start;
        self.values
            .iter()
            .map(|v| {
                let point = (month, *v);
                month = next_month(month);
                point
            })
            .collect()
    }
}

/// The modeling table, read back as per-district ordered series
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesStore {
    series: BTreeMap<DistrictCode, DistrictSeries>,
}

impl SeriesStore {
    /// Build from (district, month) points. Missing months between a district's
    /// first and last observation become zero.
    pub fn from_points(points: &[MonthlySeriesPoint]) -> Self {
        let mut by_district: BTreeMap<DistrictCode, BTreeMap<NaiveDate, u64>> = BTreeMap::new();
        for p in points {
            *by_district
                .entry(p.district_code)
                .or_default()
                .entry(month_start(p.year_month))
                .or_insert(0) += p.permit_count;
        }

        let series = by_district
            .into_iter()
            .filter_map(|(district_code, months)| {
                let (&start, _) = months.iter().next()?;
                let (&end, _) = months.iter().next_back()?;
                let mut values = Vec::new();
                let mut month = start;
                while month <= end {
                    values.push(months.get(&month).copied().unwrap_or(0));
                    month = next_month(month);
                }
                Some((
                    district_code,
                    DistrictSeries {
                        district_code,
                        start,
                        values,
                    },
                ))
            })
            .collect();

        Self { series }
    }

    pub fn districts(&self) -> Vec<DistrictCode> {
        self.series.keys().copied().collect()
    }

    pub fn series(&self, district_code: DistrictCode) -> Option<&DistrictSeries> {
        self.series.get(&district_code)
    }

    /// Drop every month after `month`; districts left empty disappear
    pub fn through(&self, month: NaiveDate) -> SeriesStore {
        let cutoff = month_start(month);
        let series = self
            .series
            .iter()
            .filter(|(_, s)| s.start <= cutoff)
            .map(|(code, s)| {
                let keep = s
                    .points()
                    .iter()
                    .take_while(|(m, _)| *m <= cutoff)
                    .count();
                let mut trimmed = s.clone();
                trimmed.values.truncate(keep);
                (*code, trimmed)
            })
            .collect();
        SeriesStore { series }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// The latest month fully covered by data whose newest issued date is `latest_issued`
pub fn last_complete_month(latest_issued: NaiveDate) -> NaiveDate {
    let month = month_start(latest_issued);
    let month_end = next_month(month).pred_opt().unwrap_or(month);
    if latest_issued.day() < month_end.day() {
        previous_month(month)
    } else {
        month
    }
}

/// A point-forecast model consuming one district's history
pub trait Forecaster {
    fn name(&self) -> &str;

    /// Predict the next `horizon` values after `history`
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<Vec<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutEvaluation {
    pub district_code: DistrictCode,
    pub model: String,
    pub holdout_start: NaiveDate,
    pub actual: Vec<f64>,
    pub predicted: Vec<f64>,
    pub mae: f64,
    pub smape: f64,
}

/// Train on everything before the last `holdout` months and score the forecast on them
pub fn evaluate_holdout(
    store: &SeriesStore,
    district_code: DistrictCode,
    forecaster: &dyn Forecaster,
    holdout: usize,
) -> Result<HoldoutEvaluation> {
    let series = store
        .series(district_code)
        .ok_or_else(|| anyhow!("District {} is not in the series store", district_code))?;
    if holdout == 0 || series.len() <= holdout {
        return Err(anyhow!(
            "District {} has {} months, need more than a {}-month holdout",
            district_code,
            series.len(),
            holdout
        ));
    }

    let split = series.len() - holdout;
    let values: Vec<f64> = series.values.iter().map(|v| *v as f64).collect();
    let (train, actual) = values.split_at(split);
    let predicted = forecaster.forecast(train, holdout)?;
    if predicted.len() != holdout {
        return Err(anyhow!(
            "{} returned {} predictions for a {}-month holdout",
            forecaster.name(),
            predicted.len(),
            holdout
        ));
    }

    let holdout_start = series.points()[split].0;
    Ok(HoldoutEvaluation {
        district_code,
        model: forecaster.name().to_string(),
        holdout_start,
        mae: mae(actual, &predicted),
        smape: smape(actual, &predicted),
        actual: actual.to_vec(),
        predicted,
    })
}

/// Mean absolute error; NaN for empty input
pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    mean(actual.iter().zip(predicted).map(|(y, p)| (y - p).abs()))
}

/// Symmetric MAPE on a 0..2 scale: mean(2|p - y| / (|p| + |y| + 1e-8))
pub fn smape(actual: &[f64], predicted: &[f64]) -> f64 {
    mean(
        actual
            .iter()
            .zip(predicted)
            .map(|(y, p)| 2.0 * (p - y).abs() / (p.abs() + y.abs() + 1e-8)),
    )
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}
