// src/classification/scaler.rs
//! Per-feature standardization fitted on training features

use std::fmt;

use linfa::prelude::*;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::{Array2, ArrayView2};

use crate::error::{BciError, BciResult};

/// Zero-mean, unit-variance scaling. Constant features keep a scale of 1.
pub struct StandardScaler {
    inner: LinearScaler<f64>,
    n_features: usize,
}

impl StandardScaler {
    pub fn fit(features: ArrayView2<f64>) -> BciResult<Self> {
        if features.nrows() == 0 {
            return Err(BciError::Training("cannot fit scaler on zero samples".into()));
        }
        let dataset = DatasetBase::from(features.to_owned());
        let inner = LinearScaler::standard()
            .fit(&dataset)
            .map_err(|e| BciError::Training(format!("feature scaler: {e}")))?;
        Ok(Self {
            inner,
            n_features: features.ncols(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn transform(&self, features: ArrayView2<f64>) -> BciResult<Array2<f64>> {
        if features.ncols() != self.n_features {
            return Err(BciError::Classification(format!(
                "scaler fitted on {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }
        Ok(self.inner.transform(features.to_owned()))
    }
}

impl fmt::Debug for StandardScaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardScaler")
            .field("offsets", self.inner.offsets())
            .field("scales", self.inner.scales())
            .finish()
    }
}
