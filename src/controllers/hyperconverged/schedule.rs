use std::sync::Mutex;

use rand::Rng;
use tracing::*;

use crate::resources::hyperconvergeds::HyperConverged;

/// Cron expression shared by all data import cron templates of the installation.
///
/// One instance lives for the whole process. A fresh process adopts the value persisted in the
/// HyperConverged status; only when both the status and the cell are empty is a new random
/// minute drawn. Two processes starting against an empty status each draw their own minute and
/// whichever writes the status first wins.
#[derive(Debug, Default)]
pub struct DataImportSchedule {
    current: Mutex<Option<String>>,
}

impl DataImportSchedule {
    #[cfg(test)]
    pub fn with_value(schedule: &str) -> Self {
        Self {
            current: Mutex::new(Some(schedule.to_string())),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reconcile the cell with the HC status and return the schedule in effect.
    /// An empty status is filled in from the cell.
    pub fn apply(&self, hc: &mut HyperConverged) -> String {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let persisted = hc
            .status
            .as_ref()
            .and_then(|s| s.data_import_schedule.clone())
            .filter(|s| !s.is_empty());

        match persisted {
            Some(persisted) => {
                if current.as_deref() != Some(persisted.as_str()) {
                    debug!("adopting data import schedule {persisted:?} from the HyperConverged status");
                    *current = Some(persisted.clone());
                }
                persisted
            }
            None => {
                let schedule = current.get_or_insert_with(generate).clone();
                hc.status_mut().data_import_schedule = Some(schedule.clone());
                schedule
            }
        }
    }
}

fn generate() -> String {
    let minute: u32 = rand::thread_rng().gen_range(0..60);
    format!("{minute} */12 * * *")
}
