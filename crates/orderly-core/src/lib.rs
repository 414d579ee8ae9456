//! orderly-core
//!
//! Core building blocks for the order record service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（order, events, outcome, errors）
//! - **ports**: 抽象化レイヤー（Connector, OrderStore, OrderCache, EventSink, Clock）
//! - **supervisor**: 接続の確立と修復（RetryPolicy, ConnectionSupervisor, Supervised）
//! - **impls**: adapter と backend（Postgres / Redis / RabbitMQ / InMemory）
//! - **app**: アプリケーションロジック（builder, coordinator, listener）
//! - **http**: axum の router
//! - **config**: 環境変数からの設定

pub mod domain;
pub mod ports;
pub mod supervisor;
pub mod impls;
pub mod app;
pub mod http;
pub mod config;
