//! voicebridge – Sprach-Bruecke zwischen lokalem Audiogeraet und
//! Voice-Server
//!
//! Die Relay-Engine lebt in `voicebridge-audio`; hier liegen Session-
//! Verwaltung, Kommando-Verarbeitung, der UDP-Voice-Link und die
//! Konfiguration.

pub mod command;
pub mod config;
pub mod link;
pub mod session;
