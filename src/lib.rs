//! Asistente web de solicitudes de propiedad intelectual (marcas, patentes y
//! copyright) con proxy de IA, análisis de cumplimiento, generación de
//! documentos y gestión de ficheros de soporte.

pub mod ai;
pub mod analysis;
pub mod api;
pub mod app_state;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod models;
pub mod neo4j_client;
pub mod prompts;
pub mod repository;
pub mod session_store;
pub mod storage;
pub mod uploads;
pub mod validation;
pub mod wizard;
