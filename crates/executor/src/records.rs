//! 诊断结果与告警记录的构造

use chrono::{DateTime, Utc};
use diagnosis_algorithms::AlgorithmOutput;
use diagnosis_core::models::{
    AlarmSeverity, Camera, DiagnosisResult, DiagnosisStatus, DiagnosisType, NewDiagnosisAlarm,
    NewDiagnosisResult, TaskPayload,
};
use serde_json::{json, Value};

use crate::ArchivedImage;

fn result_data(
    camera: &Camera,
    diagnosis_type: Option<DiagnosisType>,
    status: DiagnosisStatus,
    score: Option<f64>,
    threshold: Value,
) -> Value {
    json!({
        "camera_info": camera.info(),
        "diagnosis_info": {
            "type": diagnosis_type.map(|t| t.as_str()),
            "status": status.as_str(),
            "score": score,
            "threshold": threshold,
        }
    })
}

fn base(task: &TaskPayload, camera: &Camera, status: DiagnosisStatus) -> NewDiagnosisResult {
    NewDiagnosisResult {
        task_id: task.task_id,
        camera_id: camera.id,
        camera_name: camera.name.clone(),
        diagnosis_type: None,
        status,
        score: None,
        threshold: None,
        is_abnormal: status.is_abnormal(),
        processing_time: None,
        error_message: None,
        suggestions: Vec::new(),
        metrics: json!({}),
        image_url: None,
        thumbnail_url: None,
        image_timestamp: None,
        result_data: result_data(camera, None, status, None, Value::Null),
    }
}

/// 图像获取失败：不带诊断类型的ERROR结果
pub(crate) fn acquisition_failure(
    task: &TaskPayload,
    camera: &Camera,
    message: String,
) -> NewDiagnosisResult {
    NewDiagnosisResult {
        error_message: Some(message),
        ..base(task, camera, DiagnosisStatus::Error)
    }
}

pub(crate) fn algorithm_output(
    task: &TaskPayload,
    camera: &Camera,
    diagnosis_type: DiagnosisType,
    output: &AlgorithmOutput,
    archived: Option<&ArchivedImage>,
    captured_at: DateTime<Utc>,
) -> NewDiagnosisResult {
    let raw_threshold = serde_json::to_value(output.threshold).unwrap_or(Value::Null);
    NewDiagnosisResult {
        diagnosis_type: Some(diagnosis_type),
        score: Some(output.score),
        threshold: output.threshold.as_scalar(),
        processing_time: Some(output.processing_time),
        suggestions: vec![output.message.clone()],
        metrics: output.metrics.clone(),
        image_url: archived.map(|a| a.image_url.clone()),
        thumbnail_url: archived.map(|a| a.thumbnail_url.clone()),
        image_timestamp: Some(captured_at),
        result_data: result_data(
            camera,
            Some(diagnosis_type),
            output.status,
            Some(output.score),
            raw_threshold,
        ),
        ..base(task, camera, output.status)
    }
}

/// 算法执行失败：带诊断类型与异常信息的ERROR结果
pub(crate) fn algorithm_failure(
    task: &TaskPayload,
    camera: &Camera,
    diagnosis_type: DiagnosisType,
    error: String,
    archived: Option<&ArchivedImage>,
    captured_at: DateTime<Utc>,
) -> NewDiagnosisResult {
    let status = DiagnosisStatus::Error;
    NewDiagnosisResult {
        diagnosis_type: Some(diagnosis_type),
        error_message: Some(error),
        image_url: archived.map(|a| a.image_url.clone()),
        thumbnail_url: archived.map(|a| a.thumbnail_url.clone()),
        image_timestamp: Some(captured_at),
        result_data: result_data(camera, Some(diagnosis_type), status, None, Value::Null),
        ..base(task, camera, status)
    }
}

/// 非正常结果派生的告警，正常结果返回 `None`
pub(crate) fn alarm_for(
    result: &DiagnosisResult,
    output: &AlgorithmOutput,
    task_name: &str,
) -> Option<NewDiagnosisAlarm> {
    let severity = AlarmSeverity::from_status(output.status)?;
    let operator = if output.status == DiagnosisStatus::Warning {
        "lt"
    } else {
        "gt"
    };

    Some(NewDiagnosisAlarm {
        result_id: result.id,
        task_id: result.task_id,
        camera_id: result.camera_id,
        camera_name: result.camera_name.clone(),
        alarm_type: result.diagnosis_type,
        severity,
        title: format!("摄像头诊断异常: {}", output.message),
        description: format!(
            "任务: {task_name}\n状态: {}\n分数: {}\n阈值: {}",
            output.status.as_str(),
            output.score,
            output.threshold
        ),
        threshold_config: json!({
            "threshold": output.threshold,
            "operator": operator,
        }),
        current_value: Some(output.score),
        threshold_value: output.threshold.as_scalar(),
    })
}
