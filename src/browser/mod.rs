//! Chrome bootstrap and the chromiumoxide-backed session driver

pub mod driver;
pub mod launch;

pub use driver::{ChromiumDriver, ChromiumRule, with_page_timeout};
pub use launch::{BrowserHandle, download_managed_browser, find_browser_executable, launch_browser};
