//! H.265 PPS 解析 (7.3.2.3).

use xi_core::{BitReader, XiResult};

use super::sps::parse_scaling_list_data;

/// PPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcPps {
    pub pps_id: u32,
    pub sps_id: u32,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u32,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub init_qp: i32,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub cb_qp_offset: i32,
    pub cr_qp_offset: i32,
    pub slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    /// (num_tile_columns, num_tile_rows), 未启用 tile 时为 (1, 1)
    pub tiles: (u32, u32),
    pub loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_override_enabled_flag: bool,
    pub pps_deblocking_filter_disabled_flag: bool,
    pub lists_modification_present_flag: bool,
    pub log2_parallel_merge_level: u32,
    pub slice_segment_header_extension_present_flag: bool,
    pub chroma_qp_offset_list_enabled_flag: bool,
}

/// 解析 pic_parameter_set_rbsp()
pub fn parse_hevc_pps(r: &mut BitReader) -> XiResult<HevcPps> {
    r.enter("pic_parameter_set_rbsp()");
    let pps_id = r.ue("pps_pic_parameter_set_id")?;
    r.check_range("pps_pic_parameter_set_id", i64::from(pps_id), 0, 63)?;
    let sps_id = r.ue("pps_seq_parameter_set_id")?;
    r.check_range("pps_seq_parameter_set_id", i64::from(sps_id), 0, 15)?;
    let dependent_slice_segments_enabled_flag = r.flag("dependent_slice_segments_enabled_flag")?;
    let output_flag_present_flag = r.flag("output_flag_present_flag")?;
    let num_extra_slice_header_bits = r.u("num_extra_slice_header_bits", 3)?;
    let sign_data_hiding_enabled_flag = r.flag("sign_data_hiding_enabled_flag")?;
    let cabac_init_present_flag = r.flag("cabac_init_present_flag")?;
    let num_ref_idx_l0_default_active_minus1 = r.ue("num_ref_idx_l0_default_active_minus1")?;
    r.check_range(
        "num_ref_idx_l0_default_active_minus1",
        i64::from(num_ref_idx_l0_default_active_minus1),
        0,
        14,
    )?;
    let num_ref_idx_l1_default_active_minus1 = r.ue("num_ref_idx_l1_default_active_minus1")?;
    r.check_range(
        "num_ref_idx_l1_default_active_minus1",
        i64::from(num_ref_idx_l1_default_active_minus1),
        0,
        14,
    )?;
    let init_qp_minus26 = r.se("init_qp_minus26")?;
    // 下限 -(26 + QpBdOffsetY) 依赖 SPS 位深, 这里按最大位深放宽
    r.check_range("init_qp_minus26", i64::from(init_qp_minus26), -(26 + 48), 25)?;
    let constrained_intra_pred_flag = r.flag("constrained_intra_pred_flag")?;
    let transform_skip_enabled_flag = r.flag("transform_skip_enabled_flag")?;
    let cu_qp_delta_enabled_flag = r.flag("cu_qp_delta_enabled_flag")?;
    if cu_qp_delta_enabled_flag {
        r.ue("diff_cu_qp_delta_depth")?;
    }
    let cb_qp_offset = r.se("pps_cb_qp_offset")?;
    r.check_range("pps_cb_qp_offset", i64::from(cb_qp_offset), -12, 12)?;
    let cr_qp_offset = r.se("pps_cr_qp_offset")?;
    r.check_range("pps_cr_qp_offset", i64::from(cr_qp_offset), -12, 12)?;
    let slice_chroma_qp_offsets_present_flag = r.flag("pps_slice_chroma_qp_offsets_present_flag")?;
    let weighted_pred_flag = r.flag("weighted_pred_flag")?;
    let weighted_bipred_flag = r.flag("weighted_bipred_flag")?;
    let transquant_bypass_enabled_flag = r.flag("transquant_bypass_enabled_flag")?;
    let tiles_enabled_flag = r.flag("tiles_enabled_flag")?;
    let entropy_coding_sync_enabled_flag = r.flag("entropy_coding_sync_enabled_flag")?;

    let mut tiles = (1, 1);
    if tiles_enabled_flag {
        r.enter("tiles");
        let cols_minus1 = r.ue("num_tile_columns_minus1")?;
        r.check_range("num_tile_columns_minus1", i64::from(cols_minus1), 0, 19)?;
        let rows_minus1 = r.ue("num_tile_rows_minus1")?;
        r.check_range("num_tile_rows_minus1", i64::from(rows_minus1), 0, 21)?;
        tiles = (cols_minus1 + 1, rows_minus1 + 1);
        if !r.flag("uniform_spacing_flag")? {
            for i in 0..cols_minus1 {
                r.ue(&format!("column_width_minus1[{i}]"))?;
            }
            for i in 0..rows_minus1 {
                r.ue(&format!("row_height_minus1[{i}]"))?;
            }
        }
        r.flag("loop_filter_across_tiles_enabled_flag")?;
        r.exit();
    }
    let loop_filter_across_slices_enabled_flag =
        r.flag("pps_loop_filter_across_slices_enabled_flag")?;

    let mut deblocking_filter_override_enabled_flag = false;
    let mut pps_deblocking_filter_disabled_flag = false;
    if r.flag("deblocking_filter_control_present_flag")? {
        deblocking_filter_override_enabled_flag = r.flag("deblocking_filter_override_enabled_flag")?;
        pps_deblocking_filter_disabled_flag = r.flag("pps_deblocking_filter_disabled_flag")?;
        if !pps_deblocking_filter_disabled_flag {
            let beta = r.se("pps_beta_offset_div2")?;
            r.check_range("pps_beta_offset_div2", i64::from(beta), -6, 6)?;
            let tc = r.se("pps_tc_offset_div2")?;
            r.check_range("pps_tc_offset_div2", i64::from(tc), -6, 6)?;
        }
    }
    if r.flag("pps_scaling_list_data_present_flag")? {
        parse_scaling_list_data(r)?;
    }
    let lists_modification_present_flag = r.flag("lists_modification_present_flag")?;
    let log2_parallel_merge_level_minus2 = r.ue("log2_parallel_merge_level_minus2")?;
    r.check_range(
        "log2_parallel_merge_level_minus2",
        i64::from(log2_parallel_merge_level_minus2),
        0,
        4,
    )?;
    let slice_segment_header_extension_present_flag =
        r.flag("slice_segment_header_extension_present_flag")?;

    let mut chroma_qp_offset_list_enabled_flag = false;
    if r.flag("pps_extension_present_flag")? {
        let range = r.flag("pps_range_extension_flag")?;
        let multilayer = r.flag("pps_multilayer_extension_flag")?;
        let ext_3d = r.flag("pps_3d_extension_flag")?;
        let scc = r.flag("pps_scc_extension_flag")?;
        let ext_4bits = r.u("pps_extension_4bits", 4)?;
        if range {
            r.enter("pps_range_extension()");
            if transform_skip_enabled_flag {
                r.ue("log2_max_transform_skip_block_size_minus2")?;
            }
            r.flag("cross_component_prediction_enabled_flag")?;
            chroma_qp_offset_list_enabled_flag = r.flag("chroma_qp_offset_list_enabled_flag")?;
            if chroma_qp_offset_list_enabled_flag {
                r.ue("diff_cu_chroma_qp_offset_depth")?;
                let len_minus1 = r.ue("chroma_qp_offset_list_len_minus1")?;
                r.check_range("chroma_qp_offset_list_len_minus1", i64::from(len_minus1), 0, 5)?;
                for i in 0..=len_minus1 {
                    r.se(&format!("cb_qp_offset_list[{i}]"))?;
                    r.se(&format!("cr_qp_offset_list[{i}]"))?;
                }
            }
            r.ue("log2_sao_offset_scale_luma")?;
            r.ue("log2_sao_offset_scale_chroma")?;
            r.exit();
        }
        if multilayer || ext_3d || scc || ext_4bits != 0 {
            r.annotate("扩展数据未解析");
        }
    }
    r.exit();

    Ok(HevcPps {
        pps_id,
        sps_id,
        dependent_slice_segments_enabled_flag,
        output_flag_present_flag,
        num_extra_slice_header_bits,
        sign_data_hiding_enabled_flag,
        cabac_init_present_flag,
        num_ref_idx_l0_default_active_minus1,
        num_ref_idx_l1_default_active_minus1,
        init_qp: 26 + init_qp_minus26,
        constrained_intra_pred_flag,
        transform_skip_enabled_flag,
        cu_qp_delta_enabled_flag,
        cb_qp_offset,
        cr_qp_offset,
        slice_chroma_qp_offsets_present_flag,
        weighted_pred_flag,
        weighted_bipred_flag,
        transquant_bypass_enabled_flag,
        tiles_enabled_flag,
        entropy_coding_sync_enabled_flag,
        tiles,
        loop_filter_across_slices_enabled_flag,
        deblocking_filter_override_enabled_flag,
        pps_deblocking_filter_disabled_flag,
        lists_modification_present_flag,
        log2_parallel_merge_level: log2_parallel_merge_level_minus2 + 2,
        slice_segment_header_extension_present_flag,
        chroma_qp_offset_list_enabled_flag,
    })
}
