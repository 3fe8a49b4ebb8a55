//! Downloader tests backed by a local wiremock server
