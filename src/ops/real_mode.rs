//! The real-mode convention: the backing file is always `rw` for the owning
//! process and `r` for group/other, with `x` added for directories and for
//! files whose *requested* mode carries user-execute. The engine never
//! relies on this convention to gate access.

/// Compute the real backing-store mode for a directory or file, given
/// whether the *requested* (virtual) mode carries the user-execute bit.
pub fn get_real_mode(is_dir: bool, executable_default: bool) -> libc::mode_t {
    let mut real_mode = libc::S_IRUSR | libc::S_IRGRP | libc::S_IROTH | libc::S_IWUSR;
    if is_dir || executable_default {
        real_mode |= libc::S_IXUSR | libc::S_IXGRP | libc::S_IXOTH;
    }
    real_mode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_always_get_execute_bits() {
        let mode = get_real_mode(true, false);
        assert_eq!(mode & libc::S_IXUSR, libc::S_IXUSR);
        assert_eq!(mode & libc::S_IXOTH, libc::S_IXOTH);
    }

    #[test]
    fn plain_files_get_no_execute_unless_requested() {
        let mode = get_real_mode(false, false);
        assert_eq!(mode & libc::S_IXUSR, 0);
        let mode = get_real_mode(false, true);
        assert_eq!(mode & libc::S_IXUSR, libc::S_IXUSR);
    }

    #[test]
    fn always_rw_user_r_others() {
        let mode = get_real_mode(false, false);
        assert_eq!(mode & libc::S_IRWXU, libc::S_IRUSR | libc::S_IWUSR);
        assert_eq!(mode & libc::S_IRGRP, libc::S_IRGRP);
        assert_eq!(mode & libc::S_IROTH, libc::S_IROTH);
    }
}
