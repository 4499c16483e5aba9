use std::fmt::Display;

pub trait LogErr<T, E: Display> {
    /// If Result is `Err`, logs it on error level together with the caller
    /// location and returns the same Result. `Ok` passes through untouched.
    fn log_err(self) -> Result<T, E>;

    /// Same as `log_err`, prefixing the logged error with `msg`.
    fn log_err_msg(self, msg: &str) -> Result<T, E>;
}

impl<T, E: Display> LogErr<T, E> for Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Result<T, E> {
        if let Err(e) = &self {
            let at = std::panic::Location::caller();
            log::error!("Error at {}:{}: {}", at.file(), at.line(), e);
        }
        self
    }

    #[track_caller]
    fn log_err_msg(self, msg: &str) -> Result<T, E> {
        if let Err(e) = &self {
            let at = std::panic::Location::caller();
            log::error!("{} ({}:{}): {}", msg, at.file(), at.line(), e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::LogErr;

    #[test]
    fn test_log_err_passes_result_through() {
        let ok: Result<u8, String> = Ok(3);
        assert_eq!(ok.log_err(), Ok(3));

        let err: Result<u8, String> = Err("boom".to_string());
        assert_eq!(err.log_err_msg("while testing"), Err("boom".to_string()));
    }
}
