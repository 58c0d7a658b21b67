//! Control handle for one HTTP transfer.

use std::path::{Path, PathBuf};

use tokio::sync::watch;

use crate::transfer::{TransferHandle, TransferId};

/// What the user asked a running transfer to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Control {
    pub(crate) save_path: Option<PathBuf>,
    pub(crate) paused: bool,
    pub(crate) cancelled: bool,
}

/// Handle shared between the orchestration core and the transfer task.
///
/// Every control call updates a watch channel the task listens on, so a
/// pause or cancel takes effect at the next chunk boundary.
#[derive(Debug)]
pub struct HttpTransferHandle {
    id: TransferId,
    url: String,
    filename: String,
    control: watch::Sender<Control>,
}

impl HttpTransferHandle {
    pub(crate) fn new(
        id: TransferId,
        url: String,
        filename: String,
    ) -> (Self, watch::Receiver<Control>) {
        let (control, receiver) = watch::channel(Control::default());
        (
            Self {
                id,
                url,
                filename,
                control,
            },
            receiver,
        )
    }
}

impl TransferHandle for HttpTransferHandle {
    fn id(&self) -> TransferId {
        self.id
    }

    fn filename(&self) -> String {
        self.filename.clone()
    }

    fn url_chain(&self) -> Vec<String> {
        vec![self.url.clone()]
    }

    fn set_save_path(&self, path: &Path) {
        let path = path.to_path_buf();
        self.control.send_modify(|control| control.save_path = Some(path));
    }

    fn cancel(&self) {
        self.control.send_modify(|control| control.cancelled = true);
    }

    fn pause(&self) {
        self.control.send_modify(|control| control.paused = true);
    }

    fn resume(&self) {
        self.control.send_modify(|control| control.paused = false);
    }

    fn is_paused(&self) -> bool {
        self.control.borrow().paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_calls_reach_the_task_side() {
        let (handle, receiver) = HttpTransferHandle::new(
            TransferId(1),
            "https://example.com/a.nc".to_string(),
            "a.nc".to_string(),
        );
        handle.pause();
        assert!(handle.is_paused());
        assert!(receiver.borrow().paused);

        handle.resume();
        handle.set_save_path(Path::new("/data/a.nc"));
        handle.cancel();
        let control = receiver.borrow().clone();
        assert!(!control.paused);
        assert!(control.cancelled);
        assert_eq!(control.save_path, Some(PathBuf::from("/data/a.nc")));
    }

    #[test]
    fn test_url_chain_starts_with_requested_url() {
        let (handle, _receiver) = HttpTransferHandle::new(
            TransferId(2),
            "https://example.com/b.nc".to_string(),
            "b.nc".to_string(),
        );
        assert_eq!(handle.url_chain(), vec!["https://example.com/b.nc".to_string()]);
        assert_eq!(handle.filename(), "b.nc");
    }
}
