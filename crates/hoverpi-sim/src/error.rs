/// Rejected simulation settings.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("invalid sensor noise: {0}")]
    Noise(#[from] rand_distr::NormalError),

    #[error("sample rate must be positive, got {0}")]
    SampleRate(f64),

    #[error("{name} must be a probability in [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
}
