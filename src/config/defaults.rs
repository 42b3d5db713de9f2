pub(super) const MAX_WORKER_COUNT: u32 = 64;

pub(super) fn clamp_worker_count(value: u32) -> u32 {
    value.min(MAX_WORKER_COUNT)
}

pub(super) fn clamp_batch_size(value: usize) -> usize {
    value.max(1)
}

pub(super) fn default_batch_size() -> usize {
    32
}

pub(super) fn default_worker_count() -> u32 {
    0
}

pub(super) fn default_epochs() -> usize {
    20
}

pub(super) fn default_learning_rate() -> f32 {
    0.1
}

pub(super) fn default_l2() -> f32 {
    1e-4
}

pub(super) fn default_hidden_size() -> usize {
    16
}

pub(super) fn default_seed() -> u64 {
    42
}

pub(super) fn default_run_name() -> String {
    "run".to_string()
}

pub(super) fn default_data_dir() -> String {
    "data".to_string()
}

pub(super) fn default_train_file() -> String {
    "train.zip".to_string()
}

pub(super) fn default_val_file() -> String {
    "val.zip".to_string()
}
