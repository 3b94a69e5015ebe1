//! L14–L15: drive monitor and chunked/resumable downloader.
//!
//! Both modules decouple the polling/transfer control flow from the
//! actual SDK client behind a trait (`DriveClient`, `RemoteFile`), the
//! way the corpus keeps network and storage backends swappable behind a
//! trait object rather than hard-wiring a concrete client.

pub mod downloader;
pub mod monitor;

pub use downloader::{DownloadError, DownloadProgress, Downloader, DownloaderConfig, LocalFileRemote, RemoteFile};
pub use monitor::{DriveClient, DriveError, DriveMonitor, DriveMonitorConfig, FakeDriveClient};
