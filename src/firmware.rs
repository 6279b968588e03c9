use crate::Error;

/// Starts a firmware update from a package location
pub trait FirmwareUpdater: Send {
    /// Begin updating from `package_uri`
    ///
    /// Returns once the update has been handed off; the download itself happens elsewhere.
    fn initiate(&mut self, package_uri: &str) -> crate::Result<()>;
}

/// Updater that only records and logs requested packages
#[derive(Debug, Default)]
pub struct LoggingFirmwareUpdater {
    requested: Vec<String>,
}

impl LoggingFirmwareUpdater {
    /// Package URIs accepted so far
    pub fn requested(&self) -> &[String] {
        &self.requested
    }
}

impl FirmwareUpdater for LoggingFirmwareUpdater {
    fn initiate(&mut self, package_uri: &str) -> crate::Result<()> {
        if !(package_uri.starts_with("https://") || package_uri.starts_with("http://")) {
            return Err(Error::Other(format!(
                "unsupported firmware package location {}",
                package_uri
            )));
        }

        info!("Firmware update requested from {}", package_uri);
        self.requested.push(package_uri.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_locations() {
        let mut updater = LoggingFirmwareUpdater::default();
        updater
            .initiate("https://iotrmassets.blob.core.windows.net/firmwares/FW20.bin")
            .unwrap();
        assert_eq!(updater.requested().len(), 1);
    }

    #[test]
    fn rejects_other_schemes() {
        let mut updater = LoggingFirmwareUpdater::default();
        assert!(updater.initiate("file:///tmp/fw.bin").is_err());
        assert!(updater.requested().is_empty());
    }
}
