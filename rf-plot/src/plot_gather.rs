use crate::Series;

/// Collects observed responses and predictions of both splits for `plot`
#[derive(Debug, Clone, Default)]
pub struct PlotGather {
    targets: Series,
    train_predictions: Series,
    dev_predictions: Series,
}

impl PlotGather {
    /// Gather observed and predicted responses, the dev split following the train split in time
    pub fn from_splits(y_train: &[f64], pred_train: &[f64], y_dev: &[f64], pred_dev: &[f64]) -> Self {
        let mut gather = Self::default();
        for (i, (y, p)) in y_train.iter().zip(pred_train).enumerate() {
            gather.push_target(i as f64, *y);
            gather.push_train_pred(i as f64, *p);
        }
        let offset = y_train.len();
        for (i, (y, p)) in y_dev.iter().zip(pred_dev).enumerate() {
            gather.push_target((offset + i) as f64, *y);
            gather.push_dev_pred((offset + i) as f64, *p);
        }
        gather
    }

    #[inline(always)]
    pub fn push_target(&mut self, x: f64, y: f64) {
        self.targets.push((x, y))
    }

    #[inline(always)]
    pub fn push_train_pred(&mut self, x: f64, y: f64) {
        self.train_predictions.push((x, y))
    }

    #[inline(always)]
    pub fn push_dev_pred(&mut self, x: f64, y: f64) {
        self.dev_predictions.push((x, y))
    }

    #[inline(always)]
    pub fn targets(&self) -> &Series {
        &self.targets
    }

    #[inline(always)]
    pub fn train_predictions(&self) -> &Series {
        &self.train_predictions
    }

    #[inline(always)]
    pub fn dev_predictions(&self) -> &Series {
        &self.dev_predictions
    }
}
