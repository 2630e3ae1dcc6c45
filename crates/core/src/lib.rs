pub mod shared {
    pub mod constants;
    pub mod frame;
    pub mod model_resolver;
    pub mod session_pool;
    pub mod video_metadata;
}

pub mod detection {
    pub mod domain {
        pub mod face_descriptor;
        pub mod face_detector;
        pub mod face_embedder;
        pub mod face_landmarks;
        pub mod periodic_detection;
        pub mod reference_face;
    }
    pub mod infrastructure;
}

pub mod swapping {
    pub mod domain {
        pub mod face_enhancer;
        pub mod face_transformer;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod frame_dispatcher;
    pub mod live_swap_use_case;
    pub mod pipeline_config;
    pub mod pipeline_logger;
    pub mod swap_image_use_case;
    pub mod transform_stage;
    pub mod infrastructure {
        pub mod worker_pool;
    }
}

pub mod video {
    pub mod domain {
        pub mod frame_sink;
        pub mod frame_source;
        pub mod image_reader;
        pub mod image_writer;
        pub mod video_reader;
    }
    pub mod infrastructure {
        pub mod capture_stream;
        pub mod ffmpeg_reader;
        pub mod ffmpeg_recorder;
        pub mod image_file_reader;
        pub mod image_file_writer;
        pub mod raw_video_sink;
        pub mod resizing_sink;
    }
}
